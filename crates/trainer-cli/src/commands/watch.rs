//! Watch command implementation.
//!
//! Runs the heartbeat until Ctrl+C, logging each lifecycle change. Fatal
//! conditions are reported on the console and the process continues.

use std::sync::mpsc;

use anyhow::Result;
use owo_colors::OwoColorize;
use tracing::{error, info, warn};
use trainer_core::{Decision, Engine, EngineConfig, FatalContext, Status};

/// Run the watch command
pub fn run(config: EngineConfig, focus: bool) -> Result<()> {
    let (focus_tx, focus_rx) = mpsc::channel();
    let mut engine = Engine::builder()
        .config(config)
        .listener(move |status: Status| {
            info!("Status: {}", colorize(status));
            if status == Status::Running {
                let _ = focus_tx.send(());
            }
        })
        .reporter(report)
        .build();
    engine.install_panic_hook();

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    info!(
        "Watching for {} (Ctrl+C to exit)",
        engine.config().process_name
    );
    engine.start()?;

    loop {
        if shutdown_rx
            .recv_timeout(engine.config().heartbeat() * 10)
            .is_ok()
        {
            break;
        }
        if focus && focus_rx.try_recv().is_ok() {
            if let Err(e) = engine.bring_to_front() {
                warn!("Failed to focus game window: {}", e);
            }
        }
    }

    info!("Shutting down...");
    engine.stop();
    Ok(())
}

fn report(context: &FatalContext) -> Decision {
    error!("{}", context.message);
    error!(
        "Captured at {} (session valid: {})",
        context.captured_at.format("%Y-%m-%d %H:%M:%S"),
        context.session_valid
    );
    if !context.stack.is_empty() {
        error!("Stack: {}", context.stack);
    }
    if context.session_valid {
        Decision::Continue
    } else {
        Decision::Abort
    }
}

fn colorize(status: Status) -> String {
    match status {
        Status::Running => status.green().to_string(),
        Status::Reload | Status::NewGame => status.cyan().to_string(),
        Status::Started => status.yellow().to_string(),
        Status::Stopped | Status::NotRunning => status.red().to_string(),
    }
}
