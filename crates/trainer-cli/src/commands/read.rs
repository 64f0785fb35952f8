//! Read command implementation.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use bytemuck::Pod;
use owo_colors::OwoColorize;
use trainer_core::{Engine, EngineConfig, OffsetChain};

use crate::cli::ValueType;

/// Run the read command
pub fn run(
    config: EngineConfig,
    wait: Duration,
    chain: &OffsetChain,
    value_type: ValueType,
    count: usize,
) -> Result<()> {
    let engine = super::connect(config, wait)?;

    match engine.memory().compute_address(chain) {
        Some(address) => println!("{} -> {}", chain, format!("{:#X}", address).cyan()),
        None => println!("{} -> {}", chain, "unresolved".red()),
    }

    match value_type {
        ValueType::I32 => print_values::<i32>(&engine, chain, count)?,
        ValueType::U32 => print_values::<u32>(&engine, chain, count)?,
        ValueType::I64 => print_values::<i64>(&engine, chain, count)?,
        ValueType::U64 => print_values::<u64>(&engine, chain, count)?,
        ValueType::F32 => print_values::<f32>(&engine, chain, count)?,
        ValueType::F64 => print_values::<f64>(&engine, chain, count)?,
        ValueType::String => println!("{:?}", engine.read_string(chain)),
    }

    Ok(())
}

fn print_values<T: Pod + Display>(engine: &Engine, chain: &OffsetChain, count: usize) -> Result<()> {
    let values = engine.try_read::<T>(chain, count.max(1))?;
    for (i, value) in values.iter().enumerate() {
        println!("[{}] {}", i, value.bold());
    }
    Ok(())
}
