use std::time::Duration;

use crate::error::{Error, Result};

/// How a remote execution unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOutcome {
    /// The thread returned; carries its exit code.
    Completed(u32),
    /// The bounded wait elapsed before the thread finished.
    TimedOut,
    /// The target process died while the thread was running.
    ProcessExited,
}

/// Raw result of waiting on a remote thread, before liveness is considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadWait {
    /// The thread handle was signaled.
    Signaled,
    TimedOut,
    /// The wait itself failed or was abandoned.
    Failed(String),
}

/// Decide how a remote thread at `entry` ended.
///
/// A thread handle is also signaled when its whole process ends, so a dead
/// target wins over a signaled wait: its exit code would be the process's.
pub fn classify_thread_wait(
    entry: u64,
    wait: ThreadWait,
    process_alive: bool,
    exit_code: impl FnOnce() -> Result<u32>,
) -> Result<ThreadOutcome> {
    if !process_alive {
        return Ok(ThreadOutcome::ProcessExited);
    }
    match wait {
        ThreadWait::Signaled => exit_code().map(ThreadOutcome::Completed),
        ThreadWait::TimedOut => Ok(ThreadOutcome::TimedOut),
        ThreadWait::Failed(message) => Err(Error::WaitFailed {
            address: entry,
            message,
        }),
    }
}

/// Raw access to another process's address space.
///
/// Everything above this trait (chain resolution, typed reads, scanning,
/// remote calls) is written against it, so tests can swap in a fake backend.
pub trait ProcessMemory: Send + Sync {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()>;

    /// Reserve read/write/execute memory inside the target.
    fn allocate(&self, size: usize) -> Result<u64>;

    fn free(&self, address: u64) -> Result<()>;

    /// Run the code at `entry` as an independent thread of the target and wait
    /// at most `timeout` for it to finish.
    fn execute(&self, entry: u64, timeout: Duration) -> Result<ThreadOutcome>;

    /// Whether the target process is still running.
    fn is_alive(&self) -> bool;

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        let array: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::MemoryReadFailed {
                address,
                message: format!("short read ({} bytes)", bytes.len()),
            })?;
        Ok(u64::from_le_bytes(array))
    }
}
