use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phasegate::server::{ServerConfig, resolve_templates, start_server};

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Design-control phase-gate workflow engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the workflow engine server
    Serve {
        #[arg(long, default_value = "3172", env = "PHASEGATE_PORT")]
        port: u16,

        #[arg(long, default_value = ".phasegate/workflow.db", env = "PHASEGATE_DB")]
        db_path: PathBuf,

        /// JSON phase template catalog (defaults to the built-in
        /// design-control lifecycle)
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Validate and print the phase template catalog
    Templates {
        #[arg(long)]
        templates: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "phasegate=debug,info" } else { "phasegate=info,warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            templates,
            dev,
        } => {
            start_server(ServerConfig {
                port,
                db_path,
                templates_path: templates,
                dev_mode: dev,
            })
            .await
        }
        Commands::Templates { templates } => {
            let config = ServerConfig {
                templates_path: templates,
                ..ServerConfig::default()
            };
            let set = resolve_templates(&config)?;
            set.validate()?;
            for t in set.ordered() {
                println!("{:>2}. {}", t.sort_order, t.name);
                if !t.exit_criteria.is_empty() {
                    println!("      exit: {}", t.exit_criteria);
                }
            }
            Ok(())
        }
    }
}
