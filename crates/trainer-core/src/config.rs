//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```json
//! {
//!   "process_name": "witness64_d3d11.exe",
//!   "unresolved_scans": "fatal",
//!   "watch": {
//!     "entity_manager": "0x5B28C0",
//!     "load_counter": "0x5B28C0,0x3A4"
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, IntoStaticStr};

use crate::error::Result;
use crate::memory::OffsetChain;
use crate::session::ChainWatch;

pub const DEFAULT_PROCESS_NAME: &str = "witness64_d3d11.exe";

/// Polling period: finer in debug builds to surface races earlier.
#[cfg(debug_assertions)]
pub const DEFAULT_HEARTBEAT_MS: u64 = 10;
#[cfg(not(debug_assertions))]
pub const DEFAULT_HEARTBEAT_MS: u64 = 100;

pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5000;

/// What to do when signature scans stay unresolved after attaching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, IntoStaticStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnresolvedScanPolicy {
    Ignore,
    #[default]
    Warn,
    /// Route through the fatal handler (likely a version mismatch).
    Fatal,
}

/// Offset chains of the watched values, written as chain literals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(serialize_with = "chain_to_str", deserialize_with = "chain_from_str")]
    pub entity_manager: OffsetChain,
    #[serde(serialize_with = "chain_to_str", deserialize_with = "chain_from_str")]
    pub load_counter: OffsetChain,
}

impl From<WatchConfig> for ChainWatch {
    fn from(config: WatchConfig) -> Self {
        ChainWatch {
            entity_manager: config.entity_manager,
            load_counter: config.load_counter,
        }
    }
}

fn chain_to_str<S: Serializer>(
    chain: &OffsetChain,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(chain)
}

fn chain_from_str<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<OffsetChain, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable name of the target process
    pub process_name: String,
    pub heartbeat_ms: u64,
    /// Bounded wait for remote calls
    pub call_timeout_ms: u64,
    pub scan_chunk_size: usize,
    pub unresolved_scans: UnresolvedScanPolicy,
    pub watch: Option<WatchConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            scan_chunk_size: crate::scan::DEFAULT_CHUNK_SIZE,
            unresolved_scans: UnresolvedScanPolicy::default(),
            watch: None,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    process_name: Option<String>,
    heartbeat_ms: Option<u64>,
    call_timeout_ms: Option<u64>,
    scan_chunk_size: Option<usize>,
    unresolved_scans: Option<UnresolvedScanPolicy>,
    watch: Option<WatchConfig>,
}

impl EngineConfigBuilder {
    pub fn process_name<S: Into<String>>(mut self, name: S) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn heartbeat_ms(mut self, millis: u64) -> Self {
        self.heartbeat_ms = Some(millis);
        self
    }

    pub fn call_timeout_ms(mut self, millis: u64) -> Self {
        self.call_timeout_ms = Some(millis);
        self
    }

    pub fn scan_chunk_size(mut self, size: usize) -> Self {
        self.scan_chunk_size = Some(size);
        self
    }

    pub fn unresolved_scans(mut self, policy: UnresolvedScanPolicy) -> Self {
        self.unresolved_scans = Some(policy);
        self
    }

    pub fn watch(mut self, entity_manager: OffsetChain, load_counter: OffsetChain) -> Self {
        self.watch = Some(WatchConfig {
            entity_manager,
            load_counter,
        });
        self
    }

    pub fn build(self) -> EngineConfig {
        let default = EngineConfig::default();
        EngineConfig {
            process_name: self.process_name.unwrap_or(default.process_name),
            heartbeat_ms: self.heartbeat_ms.unwrap_or(default.heartbeat_ms),
            call_timeout_ms: self.call_timeout_ms.unwrap_or(default.call_timeout_ms),
            scan_chunk_size: self.scan_chunk_size.unwrap_or(default.scan_chunk_size),
            unresolved_scans: self.unresolved_scans.unwrap_or(default.unresolved_scans),
            watch: self.watch.or(default.watch),
        }
    }
}
