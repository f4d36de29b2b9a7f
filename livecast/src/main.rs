mod server;

use anyhow::Result;
use tracing::info;

use livecast_core::{logging, Config};

use server::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (optional path as first argument)
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Livecast coordinator starting...");

    // 4. Wire components and run until shutdown
    let coordinator = Coordinator::new(config);
    coordinator.start().await
}
