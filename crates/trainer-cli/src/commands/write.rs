//! Write command implementation.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use trainer_core::{EngineConfig, OffsetChain};

use super::parse::parse_int;
use crate::cli::ValueType;

/// Run the write command
pub fn run(
    config: EngineConfig,
    wait: Duration,
    chain: &OffsetChain,
    value_type: ValueType,
    value: &str,
) -> Result<()> {
    let bytes = match value_type {
        ValueType::String => None,
        _ => Some(encode(value_type, value)?),
    };
    let engine = super::connect(config, wait)?;

    let address = engine
        .memory()
        .compute_address(chain)
        .with_context(|| format!("Offset chain {} does not resolve", chain))?;

    match bytes {
        Some(bytes) => {
            engine.write::<u8>(chain, &bytes)?;
            println!(
                "Wrote {} ({} bytes) at {}",
                value.bold(),
                bytes.len(),
                format!("{:#X}", address).cyan()
            );
        }
        // The chain ends at a char*, as for `read --type string`
        None => {
            engine.write_string(chain, value)?;
            println!(
                "Wrote {} through the string pointer at {}",
                format!("{:?}", value).bold(),
                format!("{:#X}", address).cyan()
            );
        }
    }
    Ok(())
}

/// Little-endian bytes for a numeric `value` interpreted as `value_type`.
fn encode(value_type: ValueType, value: &str) -> Result<Vec<u8>> {
    let bytes = match value_type {
        ValueType::I32 => i32::try_from(parse_int(value)?)
            .context("Value does not fit in i32")?
            .to_le_bytes()
            .to_vec(),
        ValueType::U32 => u32::try_from(parse_int(value)?)
            .context("Value does not fit in u32")?
            .to_le_bytes()
            .to_vec(),
        ValueType::I64 => parse_int(value)?.to_le_bytes().to_vec(),
        ValueType::U64 => (parse_int(value)? as u64).to_le_bytes().to_vec(),
        ValueType::F32 => value
            .parse::<f32>()
            .context("Invalid f32")?
            .to_le_bytes()
            .to_vec(),
        ValueType::F64 => value
            .parse::<f64>()
            .context("Invalid f64")?
            .to_le_bytes()
            .to_vec(),
        ValueType::String => bail!("Strings are written through their pointer"),
    };
    Ok(bytes)
}
