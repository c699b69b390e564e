mod config;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use quorio_core::ServiceCommand;
use server::{init_node, run_server};

#[derive(Parser)]
#[command(name = "quorio")]
#[command(about = "Quorum-coordinated admin control plane for object storage clusters")]
#[command(version = quorio_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,

        /// Format drives and seed the configuration document, then exit
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config, init } => {
            if let Err(error) = serve(&config, init).await {
                tracing::error!("Server error: {:#}", error);
                std::process::exit(1);
            }
        }
    }
}

/// Boots the node, and boots it again from freshly loaded configuration
/// every time a restart is requested.
async fn serve(config_path: &str, init: bool) -> anyhow::Result<()> {
    loop {
        tracing::info!("Starting Quorio server with config: {}", config_path);
        let cfg = Config::from_file(config_path)
            .with_context(|| format!("failed to load config {}", config_path))?;

        if init {
            init_node(&cfg).await.context("initialization failed")?;
            tracing::info!(
                "Initialization completed for node {} (init-only mode)",
                cfg.node.effective_address()
            );
            return Ok(());
        }

        tracing::info!(
            "Node: {}, Bind: {}, Peers: {}, Drives: {}",
            cfg.node.effective_address(),
            cfg.node.bind_addr,
            cfg.peers.len(),
            cfg.drives.len()
        );

        match run_server(cfg).await.context("server stopped with an error")? {
            ServiceCommand::Restart => tracing::info!("Restarting"),
            ServiceCommand::Stop => {
                tracing::info!("Stopped");
                return Ok(());
            }
        }
    }
}
