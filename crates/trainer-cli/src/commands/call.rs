//! Call command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use trainer_core::{CallArgs, EngineConfig};

use super::parse::{parse_hex_address, parse_int};

pub struct CallRequest<'a> {
    pub address: &'a str,
    pub relative: bool,
    pub ints: &'a [String],
    pub floats: &'a [f32],
    pub string: Option<&'a str>,
}

/// Run the call command
pub fn run(config: EngineConfig, wait: Duration, request: CallRequest<'_>) -> Result<()> {
    let address = parse_hex_address(request.address)?;
    let ints = request
        .ints
        .iter()
        .map(|s| parse_int(s))
        .collect::<Result<Vec<_>>>()?;
    let args = CallArgs::new(&ints, request.floats)?;

    let engine = super::connect(config, wait)?;
    let target = if request.relative {
        engine.memory().base_address().wrapping_add(address)
    } else {
        address
    };

    let result = match request.string {
        Some(text) => engine.call_with_string(target, text),
        None => engine.call(target, &args),
    }
    .with_context(|| format!("Call to {:#X} failed", target))?;

    println!(
        "{:#X} returned {} ({})",
        target,
        result.bold(),
        format!("{:#X}", result as u32).dimmed()
    );
    Ok(())
}
