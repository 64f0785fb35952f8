//! Number parsing for command arguments.

use anyhow::{Context, Result, bail};

/// Parse a hex address, with or without a `0x` prefix.
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex address: {}", s))
}

/// Parse a signed integer written in decimal or as `0x`-prefixed hex.
pub fn parse_int(s: &str) -> Result<i64> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => body.parse::<u64>(),
    }
    .with_context(|| format!("Invalid integer: {}", s))?;

    if negative {
        if magnitude > i64::MIN.unsigned_abs() {
            bail!("Integer out of range: {}", s);
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        // Hex values above i64::MAX are accepted as raw 64-bit patterns
        Ok(magnitude as i64)
    }
}
