//! Control center daemon and admin CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dhpc_cc::output::{OutputFormat, OutputFormatter};
use dhpc_cc::{init_logging, CcConfig, ControlCenter};
use dhpc_registry::SaveOutcome;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "dhpc-cc")]
#[command(about = "Control center for different-hpc compute nodes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory relative paths in the configuration are resolved against
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan node configs and keep probing their IPs until interrupted
    Serve,
    /// Show the config of a node, generating one if it has none
    Resolve {
        /// MAC address of the node
        mac: String,
    },
    /// Show the boot parameters of a node
    Boot {
        /// MAC address of the node
        mac: String,
    },
    /// List known compute nodes
    Nodes,
    /// List tracked IPs and their liveness
    Alive,
    /// Save an edited node config
    Save {
        /// Config file to overwrite
        file: PathBuf,

        /// File holding the new content
        #[arg(long, value_name = "FILE")]
        from: PathBuf,

        /// File holding the content the edit started from
        #[arg(long, value_name = "FILE")]
        prior: Option<PathBuf>,
    },
    /// Print the default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CcConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CcConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(root) = &cli.root {
        config = config.rooted_at(root);
    }

    let formatter = OutputFormatter::new(cli.output);

    if let Commands::Config { output } = &cli.command {
        return generate_config(output.as_ref(), &formatter);
    }

    init_logging(&config.logging)?;
    let mut center = ControlCenter::from_config(config)?;

    match cli.command {
        Commands::Serve => {
            center
                .serve(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for shutdown signal: {}", e);
                    }
                })
                .await?;
        }
        Commands::Resolve { mac } => {
            let cfg = center.registry().resolve(&mac).await?;
            info!("mac=[{}] resolved to [{}]", mac, cfg.file_path.display());
            formatter.print_text(&cfg.raw_text);
        }
        Commands::Boot { mac } => {
            let params = center.boot_params(&mac).await?;
            formatter.print_item(&params)?;
        }
        Commands::Nodes => {
            let nodes = center.nodes().await?;
            formatter.print_list(&nodes)?;
        }
        Commands::Alive => {
            // scanning registers every config's IP
            center.registry().list_all().await?;
            formatter.print_list(&center.cared())?;
        }
        Commands::Save { file, from, prior } => {
            let new_text = std::fs::read_to_string(&from)
                .with_context(|| format!("reading {}", from.display()))?;
            let prior_text = match &prior {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => None,
            };

            match center
                .registry()
                .save_edit(&file, &new_text, prior_text.as_deref())
                .await?
            {
                SaveOutcome::Saved(Some(cfg)) => {
                    formatter.print_success(&format!(
                        "Saved [{}]: mac=[{}] ip=[{}]",
                        cfg.file_path.display(),
                        cfg.mac,
                        cfg.ip
                    ))?;
                }
                SaveOutcome::Saved(None) => {
                    formatter.print_warning(&format!(
                        "Saved [{}] but its content is invalid, the file has been quarantined",
                        file.display()
                    ))?;
                }
                SaveOutcome::Conflict { current_text, .. } => {
                    formatter.print_warning(&format!(
                        "[{}] changed since the edit started, not saved. Current content:",
                        file.display()
                    ))?;
                    formatter.print_text(&current_text);
                    bail!("edit conflict on {}", file.display());
                }
            }
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn generate_config(output: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let config = CcConfig::default();
    match output {
        Some(path) => {
            config.to_file(path)?;
            formatter.print_success(&format!("Configuration written to {}", path.display()))?;
        }
        None => formatter.print_text(&serde_yaml::to_string(&config)?),
    }
    Ok(())
}
