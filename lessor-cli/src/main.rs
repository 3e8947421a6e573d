mod handlers;
mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lessor_core::actions::ActionTable;
use lessor_core::config::ManagerConfig;
use lessor_core::plugin::PluginCatalog;

#[derive(Parser)]
#[command(
    name = "lessor",
    about = "Lessor: time-bound leases over external resources",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the manager, its event scheduler and the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "LESSOR_STORAGE")]
        storage: String,

        /// JSON manager configuration
        #[arg(short, long, env = "LESSOR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate a configuration and list the plugins it loads
    Plugins {
        #[arg(short, long, env = "LESSOR_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>) -> ManagerConfig {
    let Some(path) = path else {
        tracing::info!("No configuration file given, using defaults");
        return ManagerConfig::default();
    };
    match ManagerConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            config,
        } => {
            let config = load_config(config.as_ref());
            if let Err(e) = server::run(&host, port, &storage, config).await {
                tracing::error!(error = %e, "Lessor server stopped");
                std::process::exit(1);
            }
        }
        Commands::Plugins { config } => {
            let config = load_config(config.as_ref());
            match ActionTable::from_config(&PluginCatalog::builtin(), &config) {
                Ok((registry, _)) => match serde_json::to_string_pretty(&registry.infos()) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to render plugin list");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "Plugin configuration rejected");
                    std::process::exit(2);
                }
            }
        }
        Commands::Version => {
            println!("lessor {}", env!("CARGO_PKG_VERSION"));
            println!("Lease manager with timed lifecycle events and delegated trust");
        }
    }
}
