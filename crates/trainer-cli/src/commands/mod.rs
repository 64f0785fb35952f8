//! CLI command implementations.

pub mod call;
pub mod parse;
pub mod read;
pub mod scan;
pub mod symbolize;
pub mod watch;
pub mod write;

use std::time::Duration;

use anyhow::{Result, bail};
use tracing::info;
use trainer_core::{Engine, EngineConfig};

/// Start the heartbeat on an engine and wait until the target is live.
pub fn attach(mut engine: Engine, wait: Duration) -> Result<Engine> {
    let process_name = engine.config().process_name.clone();
    info!("Waiting for {}...", process_name);

    engine.start()?;
    if !engine.wait_until_live(wait) {
        engine.stop();
        bail!("{} did not become ready within {:?}", process_name, wait);
    }

    info!(
        "Attached to {} (base: {:#x})",
        process_name,
        engine.memory().base_address()
    );
    Ok(engine)
}

/// Engine for one-shot commands.
pub fn connect(config: EngineConfig, wait: Duration) -> Result<Engine> {
    attach(Engine::new(config), wait)
}
