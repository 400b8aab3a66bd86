use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use wallview_core::{
    bootstrap::{init_engine, load_config},
    logging,
    store::InMemoryConfigStore,
};

#[derive(Parser, Debug)]
#[command(name = "wallview")]
#[command(about = "Video wall controller", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, short, env = "WALLVIEW_CONFIG_PATH")]
    config: Option<String>,

    /// Print the stored display layouts as JSON on exit
    #[arg(long)]
    dump_layouts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("wallview starting...");

    // 3. Wire the engine
    let store = Arc::new(InMemoryConfigStore::from_config(&config));
    let parts = init_engine(&config, Some(store.clone()), None)?;

    let mut view_events = parts.events.subscribe();
    let view_task = tokio::spawn(async move {
        while let Some(event) = view_events.recv().await {
            info!(?event, "View event");
        }
    });

    let engine_task = tokio::spawn(parts.engine.run());
    info!(devices = config.devices.len(), "Engine running, press Ctrl-C to stop");

    // 4. Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    if let Err(e) = parts.handle.shutdown() {
        error!("Failed to stop engine: {}", e);
    }

    engine_task.await?;
    view_task.abort();

    if args.dump_layouts {
        println!("{}", store.export_json()?);
    }
    info!("wallview stopped");
    Ok(())
}
