use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doin_crypto::Keypair;
use doin_node::config::NodeConfig;
use doin_node::plugins::{builtin, PluginRegistry};
use doin_node::{api, logging, DoinNode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "doin")]
#[command(about = "DOIN - proof-of-optimization network node", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "doin.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,
    /// Validate the configuration and exit
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match NodeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("configuration OK");
            ExitCode::SUCCESS
        }
        Commands::Start => {
            logging::init(&config.logging);
            let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");
            match runtime.block_on(run(config)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Node exited with fatal error");
                    ExitCode::from(1)
                }
            }
        }
    }
}

async fn run(config: NodeConfig) -> Result<()> {
    let key_path = config
        .node
        .key_path
        .clone()
        .unwrap_or_else(|| config.node.data_dir.join("node.key"));
    let keypair = Keypair::load_or_generate(&key_path).context("loading node identity")?;
    info!(peer_id = %keypair.peer_id(), name = %config.node.name, "Node identity loaded");

    let mut registry = PluginRegistry::new();
    for domain in &config.domains {
        // The built-in quadratic plugin set backs any domain whose handles
        // reference it; external plugin loading is a deployment concern.
        if domain.plugins.optimize.starts_with("quadratic") {
            registry.register(&domain.id, builtin::quadratic_plugin_set());
        }
    }

    let (node, mut worker_results) = DoinNode::new(
        &config.node.name,
        keypair,
        config.params(),
        config.domain_list(),
        registry,
        config.node.roles.clone(),
        Some(&config.node.data_dir),
        None,
    )?;

    let api_handle = if config.api.enabled {
        Some(api::start(node.clone(), &config.api.host, config.api.port))
    } else {
        None
    };

    // Worker results feed back into the protocol loop.
    let worker_node = node.clone();
    tokio::spawn(async move {
        while let Some(result) = worker_results.recv().await {
            if let Err(e) = worker_node.on_worker_result(result).await {
                error!(error = %e, "Worker result handling failed");
            }
        }
    });

    // Periodic maintenance.
    let tick_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Err(e) = tick_node.tick().await {
                error!(error = %e, "Tick failed");
            }
        }
    });

    info!("Node started; waiting for shutdown signal");
    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("Shutting down");
    if let Some(handle) = api_handle {
        handle.abort();
    }
    Ok(())
}
