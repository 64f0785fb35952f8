//! In-memory stand-ins for a target process, used by unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};

use super::{
    OpenedProcess, ProcessMemory, ProcessProvider, ThreadOutcome, ThreadWait, WindowHandle,
    classify_thread_wait,
};

const ALLOCATION_BASE: u64 = 0x7FF0_0000_0000;
const ALLOCATION_STRIDE: u64 = 0x1000;

/// What a simulated remote thread does when started.
#[derive(Debug, Clone, Copy)]
pub enum MockExecution {
    Return(u32),
    Hang,
    ExitProcess,
}

/// Sparse fake address space made of independent regions.
pub struct MockProcess {
    regions: Mutex<BTreeMap<u64, Vec<u8>>>,
    allocations: Mutex<HashSet<u64>>,
    freed: Mutex<Vec<u64>>,
    executed: Mutex<Vec<(u64, Vec<u8>)>>,
    next_allocation: AtomicU64,
    pointer_reads: AtomicUsize,
    alive: AtomicBool,
    fail_allocation: AtomicBool,
    execution: Mutex<MockExecution>,
}

impl MockProcess {
    fn with_regions(regions: BTreeMap<u64, Vec<u8>>) -> Self {
        Self {
            regions: Mutex::new(regions),
            allocations: Mutex::new(HashSet::new()),
            freed: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            next_allocation: AtomicU64::new(ALLOCATION_BASE),
            pointer_reads: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            fail_allocation: AtomicBool::new(false),
            execution: Mutex::new(MockExecution::Return(0)),
        }
    }

    /// Number of pointer-sized reads performed, i.e. chain walk steps.
    pub fn pointer_reads(&self) -> usize {
        self.pointer_reads.load(Ordering::SeqCst)
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn set_execution(&self, execution: MockExecution) {
        *self.execution.lock().unwrap() = execution;
    }

    pub fn set_fail_allocation(&self, fail: bool) {
        self.fail_allocation.store(fail, Ordering::SeqCst);
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }

    pub fn freed(&self) -> Vec<u64> {
        self.freed.lock().unwrap().clone()
    }

    /// Entry points and code of every simulated thread started so far.
    pub fn executed(&self) -> Vec<(u64, Vec<u8>)> {
        self.executed.lock().unwrap().clone()
    }

    pub fn poke(&self, address: u64, data: &[u8]) {
        self.write_bytes(address, data)
            .expect("poke outside of any region");
    }

    pub fn poke_u64(&self, address: u64, value: u64) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn poke_i32(&self, address: u64, value: i32) {
        self.poke(address, &value.to_le_bytes());
    }

    fn with_region<R>(
        &self,
        address: u64,
        size: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let mut regions = self.regions.lock().unwrap();
        let (&start, bytes) = regions.range_mut(..=address).next_back()?;
        let offset = (address - start) as usize;
        let end = offset.checked_add(size)?;
        if end > bytes.len() {
            return None;
        }
        Some(f(&mut bytes[offset..end]))
    }
}

impl ProcessMemory for MockProcess {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::MemoryReadFailed {
                address,
                message: "process exited".to_string(),
            });
        }
        self.with_region(address, size, |bytes| bytes.to_vec())
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: "unmapped".to_string(),
            })
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        self.with_region(address, data.len(), |bytes| bytes.copy_from_slice(data))
            .ok_or_else(|| Error::MemoryWriteFailed {
                address,
                message: "unmapped".to_string(),
            })
    }

    fn allocate(&self, size: usize) -> Result<u64> {
        if self.fail_allocation.load(Ordering::SeqCst) {
            return Err(Error::AllocationFailed {
                size,
                message: "simulated failure".to_string(),
            });
        }
        let stride = (size as u64).div_ceil(ALLOCATION_STRIDE).max(1) * ALLOCATION_STRIDE;
        let address = self.next_allocation.fetch_add(stride, Ordering::SeqCst);
        self.regions.lock().unwrap().insert(address, vec![0; size]);
        self.allocations.lock().unwrap().insert(address);
        Ok(address)
    }

    fn free(&self, address: u64) -> Result<()> {
        if !self.allocations.lock().unwrap().remove(&address) {
            return Err(Error::MemoryWriteFailed {
                address,
                message: "not an allocation".to_string(),
            });
        }
        self.regions.lock().unwrap().remove(&address);
        self.freed.lock().unwrap().push(address);
        Ok(())
    }

    fn execute(&self, entry: u64, _timeout: Duration) -> Result<ThreadOutcome> {
        let code = self
            .regions
            .lock()
            .unwrap()
            .get(&entry)
            .cloned()
            .unwrap_or_default();
        self.executed.lock().unwrap().push((entry, code));

        let execution = *self.execution.lock().unwrap();
        let (wait, code) = match execution {
            MockExecution::Return(value) => (ThreadWait::Signaled, value),
            MockExecution::Hang => (ThreadWait::TimedOut, 0),
            // Like a real exit: the thread handle is signaled along with the process
            MockExecution::ExitProcess => {
                self.kill();
                (ThreadWait::Signaled, 0)
            }
        };
        classify_thread_wait(entry, wait, self.is_alive(), || Ok(code))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        self.pointer_reads.fetch_add(1, Ordering::SeqCst);
        let bytes = self.read_bytes(address, 8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(array))
    }
}

/// Builder for [`MockProcess`].
#[derive(Default)]
pub struct MockMemoryBuilder {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a zero-filled region.
    pub fn region(mut self, start: u64, size: usize) -> Self {
        self.regions.insert(start, vec![0; size]);
        self
    }

    pub fn write_bytes(mut self, address: u64, data: &[u8]) -> Self {
        let (&start, bytes) = self
            .regions
            .range_mut(..=address)
            .next_back()
            .expect("write outside of any region");
        let offset = (address - start) as usize;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        self
    }

    pub fn write_u64(self, address: u64, value: u64) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn build(self) -> Arc<MockProcess> {
        Arc::new(MockProcess::with_regions(self.regions))
    }
}

/// Fake process discovery: at most one running target at a time.
#[derive(Default)]
pub struct MockProvider {
    running: Mutex<Option<(u32, Arc<MockProcess>, u64, u64)>>,
    window: Mutex<Option<WindowHandle>>,
    opens: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `process` discoverable under `pid`.
    pub fn launch(
        &self,
        pid: u32,
        process: Arc<MockProcess>,
        base_address: u64,
        module_size: u64,
    ) {
        *self.running.lock().unwrap() = Some((pid, process, base_address, module_size));
    }

    /// Kill the running process and make it undiscoverable.
    pub fn terminate(&self) {
        if let Some((_, process, _, _)) = self.running.lock().unwrap().take() {
            process.kill();
        }
    }

    pub fn set_window(&self, window: Option<WindowHandle>) {
        *self.window.lock().unwrap() = window;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ProcessProvider for MockProvider {
    fn find_process_id(&self, _name: &str) -> Option<u32> {
        self.running.lock().unwrap().as_ref().map(|(pid, ..)| *pid)
    }

    fn open(&self, pid: u32) -> Result<OpenedProcess> {
        let running = self.running.lock().unwrap();
        match running.as_ref() {
            Some((running_pid, process, base_address, module_size)) if *running_pid == pid => {
                self.opens.fetch_add(1, Ordering::SeqCst);
                Ok(OpenedProcess {
                    process: process.clone(),
                    base_address: *base_address,
                    module_size: *module_size,
                })
            }
            _ => Err(Error::ProcessNotFound(pid.to_string())),
        }
    }

    fn find_window(&self, _pid: u32) -> Option<WindowHandle> {
        *self.window.lock().unwrap()
    }

    fn bring_to_front(&self, _window: WindowHandle) -> Result<()> {
        Ok(())
    }

    fn is_foreground(&self, window: WindowHandle) -> bool {
        *self.window.lock().unwrap() == Some(window)
    }
}
