use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::{ProcessMemory, RemoteMemory, ThreadOutcome};

use super::stub::{CallArgs, call_stub};

/// Default bounded wait for a remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote scratch allocations that have not been released yet.
///
/// Shared between invokers and the fatal handler so that in-flight buffers can
/// be drained before the process terminates.
#[derive(Default)]
pub struct ScratchTracker {
    live: Mutex<Vec<(u64, Arc<dyn ProcessMemory>)>>,
}

impl ScratchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn track(&self, address: u64, process: Arc<dyn ProcessMemory>) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address, process));
    }

    /// Stop tracking `address`; returns the owning process if it was still live.
    fn untrack(&self, address: u64) -> Option<Arc<dyn ProcessMemory>> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let pos = live.iter().position(|(addr, _)| *addr == address)?;
        Some(live.swap_remove(pos).1)
    }

    /// Free every outstanding allocation. Returns how many were released.
    pub fn drain(&self) -> usize {
        let live = {
            let mut guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let mut released = 0;
        for (address, process) in live {
            if release(&*process, address) {
                released += 1;
            }
        }
        released
    }
}

fn release(process: &dyn ProcessMemory, address: u64) -> bool {
    if !process.is_alive() {
        return false;
    }
    match process.free(address) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to free scratch memory at {:#x}: {}", address, e);
            false
        }
    }
}

/// Remote buffer released when dropped, whatever the call outcome.
struct Scratch<'t> {
    address: u64,
    tracker: &'t ScratchTracker,
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        if let Some(process) = self.tracker.untrack(self.address) {
            release(&*process, self.address);
        }
    }
}

/// Runs functions inside the target through injected call trampolines.
#[derive(Clone)]
pub struct RemoteInvoker {
    timeout: Duration,
    scratch: Arc<ScratchTracker>,
}

impl RemoteInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self::with_tracker(timeout, Arc::new(ScratchTracker::new()))
    }

    pub fn with_tracker(timeout: Duration, scratch: Arc<ScratchTracker>) -> Self {
        Self { timeout, scratch }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn scratch(&self) -> &Arc<ScratchTracker> {
        &self.scratch
    }

    fn allocate(&self, process: &Arc<dyn ProcessMemory>, data: &[u8]) -> Result<Scratch<'_>> {
        let address = process.allocate(data.len())?;
        self.scratch.track(address, process.clone());
        let scratch = Scratch {
            address,
            tracker: &self.scratch,
        };
        process.write_bytes(address, data)?;
        Ok(scratch)
    }

    /// Call the function at `address` and return its 32-bit result.
    ///
    /// Blocks until the remote thread finishes or the timeout elapses. A late
    /// completion after a timeout is discarded.
    pub fn call(&self, memory: &RemoteMemory<'_>, address: u64, args: &CallArgs) -> Result<i32> {
        let process = memory
            .attachment()
            .map(|a| a.process.clone())
            .ok_or(Error::NotAttached)?;

        let code = call_stub(address, args);
        let stub = self.allocate(&process, &code)?;
        debug!("Calling {:#x} through stub at {:#x}", address, stub.address);

        match process.execute(stub.address, self.timeout)? {
            ThreadOutcome::Completed(result) => Ok(result as i32),
            ThreadOutcome::TimedOut => {
                warn!("Remote call to {:#x} timed out after {:?}", address, self.timeout);
                Err(Error::InvocationTimedOut {
                    address,
                    timeout: self.timeout,
                })
            }
            ThreadOutcome::ProcessExited => {
                warn!("Target exited during remote call to {:#x}", address);
                Err(Error::ProcessExited { address })
            }
        }
    }

    /// Copy `text` into the target, NUL-terminated, and pass its address in `rcx`.
    pub fn call_with_string(
        &self,
        memory: &RemoteMemory<'_>,
        address: u64,
        text: &str,
    ) -> Result<i32> {
        let process = memory
            .attachment()
            .map(|a| a.process.clone())
            .ok_or(Error::NotAttached)?;

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        let buffer = self.allocate(&process, &bytes)?;

        self.call(memory, address, &CallArgs::single(buffer.address as i64))
    }
}
