//! Output formatting for the dhpc-cc CLI

use crate::center::{AlivenessView, NodeView};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use dhpc_core::BootParams;
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Types that can be shown as table rows or key-value details
pub trait Formattable {
    fn table_headers() -> Vec<&'static str>;
    fn table_row(&self) -> Vec<String>;
    fn key_value_pairs(&self) -> Vec<(&'static str, String)>;
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single item
    pub fn print_item<T>(&self, item: &T) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
            OutputFormat::Table => {
                for (key, value) in item.key_value_pairs() {
                    println!("{}: {}", key.bold().cyan(), value);
                }
            }
        }
        Ok(())
    }

    /// Print a list of items
    pub fn print_list<T>(&self, items: &[T]) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
            OutputFormat::Table if items.is_empty() => println!("{}", "No items found".dimmed()),
            OutputFormat::Table => println!("{}", render_table(items)),
        }
        Ok(())
    }

    /// Print raw text, e.g. a config file, unchanged in every format
    pub fn print_text(&self, text: &str) {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    pub fn print_success(&self, message: &str) -> Result<()> {
        self.print_status("success", message)
    }

    pub fn print_warning(&self, message: &str) -> Result<()> {
        self.print_status("warning", message)
    }

    fn print_status(&self, status: &str, message: &str) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let result = serde_json::json!({ "status": status, "message": message });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Yaml => {
                println!("status: {}", status);
                println!("message: {}", message);
            }
            OutputFormat::Table if status == "success" => {
                println!("{} {}", "✓".green().bold(), message.green());
            }
            OutputFormat::Table => {
                eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
            }
        }
        Ok(())
    }
}

fn render_table<T: Formattable>(items: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = T::table_headers()
        .into_iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for item in items {
        table.add_row(item.table_row());
    }
    table
}

/// Age of a timestamp relative to now, e.g. `5m 3s ago`
pub fn format_age(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let seconds = Utc::now().signed_duration_since(at).num_seconds();
    if seconds < 0 {
        return at.to_rfc3339();
    }
    format!("{} ago", format_duration(seconds as u64))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

/// Colorize a liveness status
pub fn colorize_status(status: &str) -> ColoredString {
    match status {
        "alive" => status.green(),
        "assumed" => status.cyan(),
        "suspect" => status.yellow(),
        "dead" => status.red(),
        _ => status.dimmed(),
    }
}

impl Formattable for NodeView {
    fn table_headers() -> Vec<&'static str> {
        vec!["MAC", "IP", "Status", "Last Alive", "File", "GUI"]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.mac.clone(),
            self.ip.clone(),
            colorize_status(&self.status).to_string(),
            format_age(self.last_alive),
            self.file.clone(),
            self.gui_href.clone().unwrap_or_default(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MAC", self.mac.clone()),
            ("IP", self.ip.clone()),
            ("Status", colorize_status(&self.status).to_string()),
            ("Last Alive", format_age(self.last_alive)),
            ("File", self.file.clone()),
            ("GUI Type", self.gui_type.clone().unwrap_or_default()),
            ("GUI", self.gui_href.clone().unwrap_or_default()),
            ("SSH", self.ssh.clone()),
        ]
    }
}

impl Formattable for AlivenessView {
    fn table_headers() -> Vec<&'static str> {
        vec!["IP", "Status", "Last Alive", "Last Check", "Bound MACs"]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.ip.clone(),
            colorize_status(&self.status).to_string(),
            format_age(self.last_alive),
            format_age(self.last_check),
            self.macs.join(", "),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("IP", self.ip.clone()),
            ("Status", colorize_status(&self.status).to_string()),
            ("Last Alive", format_age(self.last_alive)),
            ("Last Check", format_age(self.last_check)),
            ("Bound MACs", self.macs.join(", ")),
        ]
    }
}

impl Formattable for BootParams {
    fn table_headers() -> Vec<&'static str> {
        vec!["Kernel", "Initrd", "Cmdline"]
    }

    fn table_row(&self) -> Vec<String> {
        vec![self.kernel.clone(), self.initrd.join(" "), self.cmdline.clone()]
    }

    fn key_value_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Kernel", self.kernel.clone()),
            ("Initrd", self.initrd.join(" ")),
            ("Cmdline", self.cmdline.clone()),
        ]
    }
}
