//! Inline value templates
//!
//! Config values may embed `{{key}}` (or `{{.key}}`) references to
//! entries that appear earlier in the same file. Anything outside the
//! braces is copied verbatim.

use crate::inflate::InflatedConfig;
use crate::{Error, Result};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Expand every `{{key}}` in `template` against `ctx`.
///
/// `name` identifies the value being expanded in error messages.
/// A reference to a key that is not in `ctx` is an error.
pub fn expand(template: &str, ctx: &InflatedConfig, name: &str) -> Result<String> {
    if !template.contains(OPEN) {
        return Ok(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| {
            Error::template(format!("{}: unterminated '{{{{' in [{}]", name, template))
        })?;
        let key = reference_key(&after_open[..end], name)?;
        let value = ctx
            .get(key)
            .ok_or_else(|| Error::template(format!("{}: no value for [{}]", name, key)))?;
        out.push_str(&value.render());
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn reference_key<'a>(expr: &'a str, name: &str) -> Result<&'a str> {
    let expr = expr.trim();
    let key = expr.strip_prefix('.').unwrap_or(expr).trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(Error::template(format!(
            "{}: unsupported template expression [{}]",
            name, expr
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate::InflatedValue;

    fn ctx() -> InflatedConfig {
        let mut ctx = InflatedConfig::default();
        ctx.insert("ip", InflatedValue::Text("10.0.0.5".to_string()));
        ctx.insert("ipnum", InflatedValue::Number(5.into()));
        ctx.insert(
            "consoles",
            InflatedValue::Seq(vec!["tty0".to_string(), "ttyS0".to_string()]),
        );
        ctx
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(expand("quiet splash", &ctx(), "cmdline").unwrap(), "quiet splash");
    }

    #[test]
    fn test_references() {
        let ctx = ctx();
        assert_eq!(expand("root=nfs:{{ip}}", &ctx, "v").unwrap(), "root=nfs:10.0.0.5");
        assert_eq!(expand("n{{ .ipnum }}", &ctx, "v").unwrap(), "n5");
        assert_eq!(expand("{{ip}}/{{ipnum}}", &ctx, "v").unwrap(), "10.0.0.5/5");
        assert_eq!(expand("{{consoles}}", &ctx, "v").unwrap(), "tty0 ttyS0");
    }

    #[test]
    fn test_unknown_key_fails() {
        let err = expand("{{nope}}", &ctx(), "cmdline").unwrap_err();
        assert!(err.to_string().contains("no value for [nope]"));
    }

    #[test]
    fn test_malformed_expressions_fail() {
        assert!(expand("{{ip", &ctx(), "v").is_err());
        assert!(expand("{{}}", &ctx(), "v").is_err());
        assert!(expand("{{ip | upper}}", &ctx(), "v").is_err());
    }
}
