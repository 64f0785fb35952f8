//! Scan command implementation.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use trainer_core::{Engine, EngineConfig, load_signatures};

/// Run the scan command
pub fn run(config: EngineConfig, wait: Duration, signatures: &Path, json: bool) -> Result<()> {
    let set = load_signatures(signatures)
        .with_context(|| format!("Failed to load signatures from {:?}", signatures))?;
    eprintln!(
        "Loaded {} signatures (version {})",
        set.signatures.len(),
        set.version
    );

    // Registered before attaching so the scans run ahead of the first live tick
    let engine = Engine::new(config);
    let resolved = engine.register_signatures(&set)?;
    let engine = super::attach(engine, wait)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved.snapshot())?);
        return Ok(());
    }

    let base = engine.memory().base_address();
    let mut missing = 0;
    for sig in &set.signatures {
        match resolved.get(&sig.name) {
            Some(offset) => println!(
                "{:<32} {} {}",
                sig.name,
                format!("+{:#X}", offset).green(),
                format!("({:#X})", base.wrapping_add_signed(offset)).dimmed()
            ),
            None => {
                missing += 1;
                println!("{:<32} {}", sig.name, "unresolved".red());
            }
        }
    }

    if missing > 0 {
        eprintln!("{} of {} signatures did not resolve", missing, set.signatures.len());
    }
    Ok(())
}
