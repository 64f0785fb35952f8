use std::fmt;
use std::str::FromStr;

use memchr::memmem;

use crate::error::{Error, Result};

/// Byte pattern with optional wildcard positions.
///
/// Patterns are the identity of a registered scan, so they order and hash by
/// their bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern(Vec<Option<u8>>);

impl Pattern {
    /// Literal pattern without wildcards.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.iter().copied().map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_wildcards(&self) -> bool {
        self.0.iter().any(Option::is_none)
    }

    pub fn bytes(&self) -> &[Option<u8>] {
        &self.0
    }

    fn literal(&self) -> Option<Vec<u8>> {
        self.0.iter().copied().collect()
    }

    /// Start positions of every match in `haystack` below `limit`.
    pub fn find_all(&self, haystack: &[u8], limit: usize) -> Vec<usize> {
        if self.is_empty() || limit == 0 || haystack.len() < self.len() {
            return Vec::new();
        }

        if let Some(needle) = self.literal() {
            return memmem::find_iter(haystack, &needle)
                .take_while(|&pos| pos < limit)
                .collect();
        }

        let mut results = Vec::new();
        let last = (haystack.len() - self.len()).min(limit.saturating_sub(1));

        'outer: for i in 0..=last {
            for (j, byte) in self.0.iter().enumerate() {
                if let Some(value) = byte
                    && haystack[i + j] != *value
                {
                    continue 'outer;
                }
            }
            results.push(i);
        }

        results
    }
}

impl From<&[u8]> for Pattern {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl<const N: usize> From<[u8; N]> for Pattern {
    fn from(bytes: [u8; N]) -> Self {
        Self::from_bytes(&bytes)
    }
}

impl From<Vec<u8>> for Pattern {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(&bytes)
    }
}

impl FromStr for Pattern {
    type Err = Error;

    /// Parse `"48 8D 0D ?? ?? ?? ??"`.
    fn from_str(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(None);
                continue;
            }

            let value = u8::from_str_radix(token, 16)
                .map_err(|e| Error::InvalidPattern(format!("token '{}': {}", token, e)))?;
            bytes.push(Some(value));
        }

        if bytes.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }
        if bytes.iter().all(Option::is_none) {
            return Err(Error::InvalidPattern("pattern is all wildcards".to_string()));
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match byte {
                Some(value) => write!(f, "{:02X}", value)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

/// Decode a RIP-relative 32-bit operand into an image-relative address.
///
/// `offset` is the image-relative start of `data`, `index` the position of the
/// displacement inside `data`, and `bytes_to_eol` the distance from `index` to
/// the end of the instruction (4 when the displacement is its last field).
pub fn read_static_int(
    offset: i64,
    index: usize,
    data: &[u8],
    bytes_to_eol: usize,
) -> Option<i64> {
    let disp: [u8; 4] = data.get(index..index + 4)?.try_into().ok()?;
    Some(offset + index as i64 + bytes_to_eol as i64 + i32::from_le_bytes(disp) as i64)
}
