use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

use super::pattern::Pattern;
use super::scanner::{ScanFlow, SignatureScanner};

/// A code signature that locates a RIP-relative operand.
///
/// The match starts `instr_offset` bytes before the instruction of interest;
/// its 32-bit displacement sits `disp_offset` bytes into an instruction that
/// is `instr_len` bytes long.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSignature {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub instr_offset: usize,
    pub disp_offset: usize,
    pub instr_len: usize,
    #[serde(default)]
    pub addend: i64,
}

impl CodeSignature {
    pub fn pattern(&self) -> Result<Pattern> {
        self.pattern.parse()
    }

    fn bytes_to_eol(&self) -> usize {
        self.instr_len.saturating_sub(self.disp_offset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub signatures: Vec<CodeSignature>,
}

/// Image-relative offsets resolved by a [`SignatureSet`], filled in as scans run.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOffsets(Arc<Mutex<BTreeMap<String, i64>>>);

impl ResolvedOffsets {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn insert(&self, name: &str, offset: i64) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), offset);
    }
}

impl SignatureSet {
    pub fn signature(&self, name: &str) -> Option<&CodeSignature> {
        self.signatures
            .iter()
            .find(|sig| sig.name.eq_ignore_ascii_case(name))
    }

    /// Register one scan per signature. Each scan keeps searching until a match
    /// whose operand can be decoded.
    pub fn register(&self, scanner: &mut SignatureScanner) -> Result<ResolvedOffsets> {
        let resolved = ResolvedOffsets::default();

        for sig in &self.signatures {
            let pattern = sig.pattern()?;
            let results = resolved.clone();
            let name = sig.name.clone();
            let operand = sig.instr_offset + sig.disp_offset;
            let bytes_to_eol = sig.bytes_to_eol();
            let addend = sig.addend;

            scanner.add_scan_with_continuation(pattern, move |hit| {
                match hit.read_static_int(hit.index + operand, bytes_to_eol) {
                    Some(target) => {
                        results.insert(&name, target + addend);
                        ScanFlow::Accept
                    }
                    None => ScanFlow::KeepSearching,
                }
            })?;
        }

        Ok(resolved)
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(signatures)?;
    fs::write(path, content)?;
    Ok(())
}
