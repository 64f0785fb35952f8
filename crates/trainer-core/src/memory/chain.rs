//! Declarative pointer-chasing paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A path from a base address to a final address.
///
/// Walking the chain means: start at the image base (or at zero when the chain
/// is absolute), add `offsets[0]`, read a pointer, add `offsets[1]`, read a
/// pointer, ... and finally add the last offset. The final address itself is
/// never dereferenced; typed reads and writes do that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetChain {
    offsets: Vec<i64>,
    #[serde(default)]
    absolute: bool,
}

impl OffsetChain {
    /// Chain relative to the image base.
    pub fn new(offsets: impl Into<Vec<i64>>) -> Self {
        Self {
            offsets: offsets.into(),
            absolute: false,
        }
    }

    /// Chain whose first offset is itself an absolute address.
    pub fn absolute(offsets: impl Into<Vec<i64>>) -> Self {
        Self {
            offsets: offsets.into(),
            absolute: true,
        }
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Extend the chain by one more dereference step.
    pub fn then(&self, offset: i64) -> Self {
        let mut offsets = self.offsets.clone();
        offsets.push(offset);
        Self {
            offsets,
            absolute: self.absolute,
        }
    }

    /// Walk the chain from `image_base`.
    ///
    /// `read_pointer` is called once per intermediate step. A failed or null
    /// dereference ends the walk with `None`.
    pub fn walk<F>(&self, image_base: u64, mut read_pointer: F) -> Option<u64>
    where
        F: FnMut(u64) -> Option<u64>,
    {
        let mut address = if self.absolute { 0 } else { image_base };
        let Some((last, steps)) = self.offsets.split_last() else {
            return Some(address);
        };

        for &offset in steps {
            address = address.wrapping_add_signed(offset);
            match read_pointer(address) {
                Some(pointer) if pointer != 0 => address = pointer,
                _ => return None,
            }
        }

        Some(address.wrapping_add_signed(*last))
    }
}

impl fmt::Display for OffsetChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("abs:")?;
        }
        for (i, offset) in self.offsets.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if *offset < 0 {
                write!(f, "-{:#x}", offset.unsigned_abs())?;
            } else {
                write!(f, "{:#x}", offset)?;
            }
        }
        Ok(())
    }
}

impl FromStr for OffsetChain {
    type Err = Error;

    /// Parse `"0x10,-0x8,32"`; an `abs:` prefix marks an absolute chain.
    fn from_str(s: &str) -> Result<Self> {
        let (absolute, body) = match s.trim().strip_prefix("abs:") {
            Some(rest) => (true, rest),
            None => (false, s.trim()),
        };

        let offsets = body
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(parse_offset)
            .collect::<Result<Vec<_>>>()?;

        if offsets.is_empty() {
            return Err(Error::InvalidOffsetChain("chain is empty".to_string()));
        }

        Ok(Self { offsets, absolute })
    }
}

fn parse_offset(token: &str) -> Result<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };

    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|e| Error::InvalidOffsetChain(format!("'{}': {}", token, e)))?;

    Ok(if negative { -value } else { value })
}
