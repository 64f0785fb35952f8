use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::invoke::{DEFAULT_CALL_TIMEOUT, RemoteInvoker, ScratchTracker};
use crate::memory::{AddressCache, Attachment, RemoteMemory};
use crate::scan::SignatureScanner;

use super::heartbeat::HeartbeatSignal;
use super::status::{SharedStatus, Status};

/// State shared by the heartbeat thread and caller threads.
///
/// The published attachment is written only by the heartbeat. Callers take an
/// `Arc` snapshot of it, so handle and base address are always read together.
pub struct SessionShared {
    attachment: RwLock<Option<Arc<Attachment>>>,
    status: SharedStatus,
    cache: AddressCache,
    scanner: Mutex<SignatureScanner>,
    signal: HeartbeatSignal,
    scratch: Arc<ScratchTracker>,
}

impl SessionShared {
    pub fn new(scan_chunk_size: usize) -> Self {
        let scratch = Arc::new(ScratchTracker::new());
        let mut scanner = SignatureScanner::with_chunk_size(scan_chunk_size);
        scanner.set_invoker(RemoteInvoker::with_tracker(
            DEFAULT_CALL_TIMEOUT,
            Arc::clone(&scratch),
        ));

        Self {
            attachment: RwLock::new(None),
            status: SharedStatus::default(),
            cache: AddressCache::new(),
            scanner: Mutex::new(scanner),
            signal: HeartbeatSignal::new(),
            scratch,
        }
    }

    /// The attachment callers may use, if any.
    pub fn attachment(&self) -> Option<Arc<Attachment>> {
        self.attachment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, attachment: Option<Arc<Attachment>>) {
        *self.attachment.write().unwrap_or_else(PoisonError::into_inner) = attachment;
    }

    /// Caller-facing view of the published session.
    pub fn memory(&self) -> RemoteMemory<'_> {
        RemoteMemory::new(self.attachment(), &self.cache)
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.status.set(status);
    }

    pub fn scanner(&self) -> MutexGuard<'_, SignatureScanner> {
        self.scanner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn signal(&self) -> &HeartbeatSignal {
        &self.signal
    }

    pub fn scratch(&self) -> &Arc<ScratchTracker> {
        &self.scratch
    }

    /// Whether a session is published and its process is still running.
    pub fn is_session_handle_valid(&self) -> bool {
        self.attachment()
            .is_some_and(|attachment| attachment.process.is_alive())
    }
}
