//! Signature scanner
//!
//! Holds a registry of byte patterns and their callbacks. Each pass captures one
//! snapshot of the target's main module and searches every unresolved pattern
//! in it. Resolved scans are skipped until [`SignatureScanner::reset`] is called
//! for a fresh attach.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::invoke::{CallArgs, DEFAULT_CALL_TIMEOUT, RemoteInvoker};
use crate::memory::RemoteMemory;

use super::pattern::{Pattern, read_static_int};

/// Default snapshot chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 0x10000;

/// Extra bytes read past each chunk so operands following a match near the
/// chunk end are still inside the window.
const OPERAND_PADDING: usize = 0x100;

/// A match handed to a scan callback.
pub struct ScanHit<'a> {
    /// Image-relative offset of `data[0]`.
    pub offset: i64,
    /// Position of the match inside `data`.
    pub index: usize,
    /// The snapshot window the match was found in.
    pub data: &'a [u8],
    /// Session view the scan runs against.
    pub memory: &'a RemoteMemory<'a>,
    invoker: &'a RemoteInvoker,
}

impl ScanHit<'_> {
    /// Image-relative offset of the first matched byte.
    pub fn match_offset(&self) -> i64 {
        self.offset + self.index as i64
    }

    /// Decode the RIP-relative displacement stored at `data[index..index + 4]`.
    pub fn read_static_int(&self, index: usize, bytes_to_eol: usize) -> Option<i64> {
        read_static_int(self.offset, index, self.data, bytes_to_eol)
    }

    /// Absolute address of an image-relative offset in the current session.
    pub fn absolute(&self, image_offset: i64) -> u64 {
        self.memory.base_address().wrapping_add_signed(image_offset)
    }

    /// Call a function in the target, e.g. one this scan just located.
    ///
    /// Goes through the scanner's invoker, so scratch memory is tracked with
    /// every other call of the session.
    pub fn call(&self, address: u64, args: &CallArgs) -> Result<i32> {
        self.invoker.call(self.memory, address, args)
    }
}

/// Decision returned by a continuation-controlled scan callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFlow {
    /// This match is the right one; the scan is resolved.
    Accept,
    /// Keep looking past this match.
    KeepSearching,
}

/// Resolution state of one registered scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Unresolved,
    /// Resolved at this image-relative offset.
    Resolved(i64),
}

type OnceFn = Box<dyn FnMut(&ScanHit<'_>) + Send>;
type ContinuationFn = Box<dyn FnMut(&ScanHit<'_>) -> ScanFlow + Send>;

enum ScanCallback {
    Once(OnceFn),
    Continuation(ContinuationFn),
}

struct SigScan {
    callback: ScanCallback,
    state: ScanState,
}

struct Chunk {
    offset: i64,
    len: usize,
    bytes: Vec<u8>,
}

/// One read of the target's main module, split into overlapping chunks.
struct ModuleSnapshot {
    chunks: Vec<Chunk>,
}

impl ModuleSnapshot {
    fn capture(memory: &RemoteMemory<'_>, chunk_size: usize, overlap: usize) -> Self {
        let base = memory.base_address();
        let end = memory.end_of_module();
        let mut chunks = Vec::new();
        let mut address = base;

        while address < end {
            let remaining = (end - address) as usize;
            let len = chunk_size.min(remaining);
            let read_size = (len + overlap).min(remaining);

            match memory.try_read_bytes(address, read_size) {
                Ok(bytes) => chunks.push(Chunk {
                    offset: (address - base) as i64,
                    len: len.min(bytes.len()),
                    bytes,
                }),
                Err(e) => trace!("Skipping unreadable chunk at {:#x}: {}", address, e),
            }
            address += len as u64;
        }

        Self { chunks }
    }
}

/// Registry of signature scans keyed by pattern.
pub struct SignatureScanner {
    scans: BTreeMap<Pattern, SigScan>,
    chunk_size: usize,
    pending: bool,
    invoker: RemoteInvoker,
}

impl SignatureScanner {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            scans: BTreeMap::new(),
            chunk_size: chunk_size.max(1),
            pending: false,
            invoker: RemoteInvoker::new(DEFAULT_CALL_TIMEOUT),
        }
    }

    /// Invoker handed to callbacks through [`ScanHit::call`].
    pub fn set_invoker(&mut self, invoker: RemoteInvoker) {
        self.invoker = invoker;
    }

    pub fn invoker(&self) -> &RemoteInvoker {
        &self.invoker
    }

    fn insert(&mut self, pattern: Pattern, callback: ScanCallback) -> Result<()> {
        if self.scans.contains_key(&pattern) {
            return Err(Error::DuplicateScan(pattern.to_string()));
        }
        self.scans.insert(
            pattern,
            SigScan {
                callback,
                state: ScanState::Unresolved,
            },
        );
        self.pending = true;
        Ok(())
    }

    /// Register a fire-once scan: the first match resolves it.
    pub fn add_scan<F>(&mut self, pattern: impl Into<Pattern>, callback: F) -> Result<()>
    where
        F: FnMut(&ScanHit<'_>) + Send + 'static,
    {
        self.insert(pattern.into(), ScanCallback::Once(Box::new(callback)))
    }

    /// Register a scan whose callback decides, match by match, whether to keep searching.
    pub fn add_scan_with_continuation<F>(
        &mut self,
        pattern: impl Into<Pattern>,
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(&ScanHit<'_>) -> ScanFlow + Send + 'static,
    {
        self.insert(pattern.into(), ScanCallback::Continuation(Box::new(callback)))
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn state(&self, pattern: &Pattern) -> Option<ScanState> {
        self.scans.get(pattern).map(|scan| scan.state)
    }

    pub fn unresolved_count(&self) -> usize {
        self.scans
            .values()
            .filter(|scan| scan.state == ScanState::Unresolved)
            .count()
    }

    /// Whether scans were registered or reset since the last pass.
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Mark every scan unresolved; used when a new process incarnation is attached.
    pub fn reset(&mut self) {
        for scan in self.scans.values_mut() {
            scan.state = ScanState::Unresolved;
        }
        self.pending = !self.scans.is_empty();
    }

    /// Run every unresolved scan over one snapshot of the main module.
    ///
    /// Returns the number of scans still unresolved. Callbacks run with the
    /// scanner borrowed and must not register new scans.
    pub fn execute_scans(&mut self, memory: &RemoteMemory<'_>) -> usize {
        self.pending = false;

        let unresolved = self.unresolved_count();
        if unresolved == 0 || !memory.is_attached() {
            return unresolved;
        }

        let longest = self
            .scans
            .iter()
            .filter(|(_, scan)| scan.state == ScanState::Unresolved)
            .map(|(pattern, _)| pattern.len())
            .max()
            .unwrap_or(1);
        let snapshot = ModuleSnapshot::capture(
            memory,
            self.chunk_size,
            longest.saturating_sub(1) + OPERAND_PADDING,
        );

        let invoker = &self.invoker;
        for (pattern, scan) in self.scans.iter_mut() {
            if scan.state != ScanState::Unresolved {
                continue;
            }
            scan.state = run_scan(pattern, &mut scan.callback, &snapshot, memory, invoker);
            if let ScanState::Resolved(offset) = scan.state {
                debug!("Scan [{}] resolved at +{:#x}", pattern, offset);
            }
        }

        let remaining = self.unresolved_count();
        if remaining > 0 {
            debug!("{} of {} signature scans unresolved", remaining, self.scans.len());
        }
        remaining
    }
}

impl Default for SignatureScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn run_scan(
    pattern: &Pattern,
    callback: &mut ScanCallback,
    snapshot: &ModuleSnapshot,
    memory: &RemoteMemory<'_>,
    invoker: &RemoteInvoker,
) -> ScanState {
    for chunk in &snapshot.chunks {
        for index in pattern.find_all(&chunk.bytes, chunk.len) {
            let hit = ScanHit {
                offset: chunk.offset,
                index,
                data: &chunk.bytes,
                memory,
                invoker,
            };

            match callback {
                ScanCallback::Once(f) => {
                    f(&hit);
                    return ScanState::Resolved(hit.match_offset());
                }
                ScanCallback::Continuation(f) => {
                    if f(&hit) == ScanFlow::Accept {
                        return ScanState::Resolved(hit.match_offset());
                    }
                }
            }
        }
    }
    ScanState::Unresolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{ScratchTracker, call_stub};
    use crate::memory::{AddressCache, Attachment, MockExecution, MockMemoryBuilder, ProcessMemory};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const BASE: u64 = 0x1_4000_0000;
    const MODULE_SIZE: usize = 0x1000;

    fn module_with(writes: &[(usize, &[u8])]) -> Arc<dyn ProcessMemory> {
        let mut builder = MockMemoryBuilder::new().region(BASE, MODULE_SIZE);
        for (offset, bytes) in writes {
            builder = builder.write_bytes(BASE + *offset as u64, bytes);
        }
        builder.build()
    }

    fn attach(process: Arc<dyn ProcessMemory>) -> Option<Arc<Attachment>> {
        Some(Arc::new(Attachment::new(process, 1, BASE, MODULE_SIZE as u64)))
    }

    const SIGNATURE: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

    #[test]
    fn test_fire_once_scan_runs_exactly_once() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(module_with(&[(0x345, &SIGNATURE)])), &cache);
        let hits = Arc::new(Mutex::new(Vec::new()));

        let mut scanner = SignatureScanner::with_chunk_size(0x100);
        let recorded = Arc::clone(&hits);
        scanner
            .add_scan(SIGNATURE, move |hit| {
                recorded.lock().unwrap().push(hit.match_offset());
            })
            .unwrap();

        assert_eq!(scanner.execute_scans(&memory), 0);
        assert_eq!(*hits.lock().unwrap(), vec![0x345]);
        assert_eq!(
            scanner.state(&Pattern::from(SIGNATURE)),
            Some(ScanState::Resolved(0x345))
        );

        assert_eq!(scanner.execute_scans(&memory), 0);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_callback_calls_through_scanner_invoker() {
        let process = MockMemoryBuilder::new()
            .region(BASE, MODULE_SIZE)
            .write_bytes(BASE + 0x200, &SIGNATURE)
            .build();
        process.set_execution(MockExecution::Return(7));
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(process.clone()), &cache);

        let tracker = Arc::new(ScratchTracker::new());
        let mut scanner = SignatureScanner::new();
        scanner.set_invoker(RemoteInvoker::with_tracker(
            Duration::from_millis(50),
            Arc::clone(&tracker),
        ));
        let result = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&result);
        scanner
            .add_scan(SIGNATURE, move |hit| {
                let function = hit.absolute(hit.match_offset());
                *recorded.lock().unwrap() = Some(hit.call(function, &CallArgs::single(1)).unwrap());
            })
            .unwrap();

        assert_eq!(scanner.execute_scans(&memory), 0);
        assert_eq!(*result.lock().unwrap(), Some(7));
        assert_eq!(
            process.executed()[0].1,
            call_stub(BASE + 0x200, &CallArgs::single(1))
        );
        assert!(Arc::ptr_eq(scanner.invoker().scratch(), &tracker));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_match_straddling_chunk_boundary_reported_once() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(module_with(&[(0xFE, &SIGNATURE)])), &cache);
        let hits = Arc::new(Mutex::new(Vec::new()));

        let mut scanner = SignatureScanner::with_chunk_size(0x100);
        let recorded = Arc::clone(&hits);
        scanner
            .add_scan_with_continuation(SIGNATURE, move |hit| {
                recorded.lock().unwrap().push(hit.match_offset());
                ScanFlow::KeepSearching
            })
            .unwrap();

        scanner.execute_scans(&memory);
        assert_eq!(*hits.lock().unwrap(), vec![0xFE]);
    }

    #[test]
    fn test_continuation_scan_sees_every_match() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(
            attach(module_with(&[(0x10, &SIGNATURE), (0x800, &SIGNATURE)])),
            &cache,
        );
        let hits = Arc::new(Mutex::new(Vec::new()));

        let mut scanner = SignatureScanner::with_chunk_size(0x100);
        let recorded = Arc::clone(&hits);
        scanner
            .add_scan_with_continuation(SIGNATURE, move |hit| {
                recorded.lock().unwrap().push(hit.match_offset());
                ScanFlow::KeepSearching
            })
            .unwrap();

        assert_eq!(scanner.execute_scans(&memory), 1);
        assert_eq!(*hits.lock().unwrap(), vec![0x10, 0x800]);
    }

    #[test]
    fn test_continuation_scan_can_pick_second_match() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(
            attach(module_with(&[
                (0x10, &[0xAA, 0x01, 0xCC]),
                (0x20, &[0xAA, 0x02, 0xCC]),
            ])),
            &cache,
        );

        let mut scanner = SignatureScanner::new();
        let pattern: Pattern = "AA ?? CC".parse().unwrap();
        scanner
            .add_scan_with_continuation(pattern.clone(), |hit| {
                if hit.data[hit.index + 1] == 0x02 {
                    ScanFlow::Accept
                } else {
                    ScanFlow::KeepSearching
                }
            })
            .unwrap();

        assert_eq!(scanner.execute_scans(&memory), 0);
        assert_eq!(scanner.state(&pattern), Some(ScanState::Resolved(0x20)));
    }

    #[test]
    fn test_unresolved_scan_is_counted_every_pass() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(module_with(&[])), &cache);

        let mut scanner = SignatureScanner::new();
        scanner.add_scan(SIGNATURE, |_| {}).unwrap();

        assert_eq!(scanner.execute_scans(&memory), 1);
        assert_eq!(scanner.execute_scans(&memory), 1);
    }

    #[test]
    fn test_duplicate_pattern_is_rejected() {
        let mut scanner = SignatureScanner::new();
        scanner.add_scan(SIGNATURE, |_| {}).unwrap();
        let err = scanner.add_scan(SIGNATURE, |_| {}).unwrap_err();
        assert!(matches!(err, Error::DuplicateScan(_)));
        assert_eq!(scanner.len(), 1);
    }

    #[test]
    fn test_reset_rearms_resolved_scans() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(module_with(&[(0x40, &SIGNATURE)])), &cache);
        let count = Arc::new(Mutex::new(0));

        let mut scanner = SignatureScanner::new();
        let counter = Arc::clone(&count);
        scanner
            .add_scan(SIGNATURE, move |_| *counter.lock().unwrap() += 1)
            .unwrap();

        scanner.execute_scans(&memory);
        assert!(!scanner.has_pending());
        scanner.reset();
        assert!(scanner.has_pending());
        assert_eq!(scanner.unresolved_count(), 1);

        scanner.execute_scans(&memory);
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_no_session_leaves_scans_unresolved() {
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(None, &cache);

        let mut scanner = SignatureScanner::new();
        scanner.add_scan(SIGNATURE, |_| panic!("must not run")).unwrap();
        assert_eq!(scanner.execute_scans(&memory), 1);
    }

    #[test]
    fn test_hit_decodes_rip_relative_operand() {
        // mov rax, [rip+0x200] at +0x100: 48 8B 05 00 02 00 00
        let code = [0x48, 0x8B, 0x05, 0x00, 0x02, 0x00, 0x00];
        let cache = AddressCache::new();
        let memory = RemoteMemory::new(attach(module_with(&[(0x100, &code)])), &cache);
        let target = Arc::new(Mutex::new(None));

        let mut scanner = SignatureScanner::new();
        let found = Arc::clone(&target);
        scanner
            .add_scan([0x48, 0x8B, 0x05], move |hit| {
                *found.lock().unwrap() = hit.read_static_int(hit.index + 3, 4);
            })
            .unwrap();

        scanner.execute_scans(&memory);
        assert_eq!(*target.lock().unwrap(), Some(0x107 + 0x200));
    }
}
