use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("No live process session")]
    NotAttached,

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Failed to allocate {size} bytes in target process: {message}")]
    AllocationFailed { size: usize, message: String },

    #[error("Failed to start remote thread at {address:#x}: {message}")]
    ThreadSpawnFailed { address: u64, message: String },

    #[error("Remote call to {address:#x} did not complete within {timeout:?}")]
    InvocationTimedOut { address: u64, timeout: Duration },

    #[error("Failed waiting on remote thread at {address:#x}: {message}")]
    WaitFailed { address: u64, message: String },

    #[error("Target process exited during remote call to {address:#x}")]
    ProcessExited { address: u64 },

    #[error("Too many {kind} arguments: {count} (at most 4)")]
    TooManyArguments { kind: &'static str, count: usize },

    #[error("Invalid byte pattern: {0}")]
    InvalidPattern(String),

    #[error("Signature scan already registered: {0}")]
    DuplicateScan(String),

    #[error("{0} signature scans did not resolve")]
    UnresolvedScans(usize),

    #[error("Invalid offset chain: {0}")]
    InvalidOffsetChain(String),

    #[error("Heartbeat failed: {0}")]
    HeartbeatFailed(String),

    #[error("Invalid call stack: {0}")]
    InvalidCallStack(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether this error came out of a remote invocation rather than plain memory access.
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            Error::AllocationFailed { .. }
                | Error::ThreadSpawnFailed { .. }
                | Error::InvocationTimedOut { .. }
                | Error::WaitFailed { .. }
                | Error::ProcessExited { .. }
        )
    }
}
