//! Process lifecycle state machine.
//!
//! One [`ProcessSession::tick`] per heartbeat:
//!
//! | From                  | To         | When                                        |
//! |-----------------------|------------|---------------------------------------------|
//! | NotRunning            | Started    | process found and opened                    |
//! | Started               | Running    | watched values readable, scans executed     |
//! | Running               | Reload     | predicate reports a reload                  |
//! | Running               | NewGame    | predicate reports a new game                |
//! | Reload, NewGame       | Reload     | predicate reports another reload            |
//! | Reload, NewGame       | NewGame    | predicate reports a new game                |
//! | Reload, NewGame       | Running    | next tick otherwise                         |
//! | any attached state    | Stopped    | process exited                              |
//! | Stopped               | NotRunning | next tick, session torn down                |
//!
//! The session is published to callers only once scans have run, and
//! unpublished as soon as the process is gone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{EngineConfig, UnresolvedScanPolicy};
use crate::error::Error;
use crate::fatal::FatalHandler;
use crate::memory::{Attachment, ProcessProvider, RemoteMemory};

use super::predicate::{DefaultPredicate, Transition, TransitionPredicate};
use super::shared::SessionShared;
use super::status::{Status, StatusListener};
use super::watch::{ChainWatch, WatchSource, Watched};

/// Owns the process handle and drives lifecycle transitions.
pub struct ProcessSession<P: ProcessProvider> {
    provider: Arc<P>,
    shared: Arc<SessionShared>,
    fatal: Arc<FatalHandler>,
    process_name: String,
    policy: UnresolvedScanPolicy,
    watch: Option<Box<dyn WatchSource>>,
    predicate: Box<dyn TransitionPredicate>,
    listener: Option<Box<dyn StatusListener>>,
    attachment: Option<Arc<Attachment>>,
    status: Status,
    previous: Watched,
}

impl<P: ProcessProvider> ProcessSession<P> {
    pub fn new(
        provider: Arc<P>,
        shared: Arc<SessionShared>,
        fatal: Arc<FatalHandler>,
        config: &EngineConfig,
    ) -> Self {
        let watch = config
            .watch
            .clone()
            .map(|watch| Box::new(ChainWatch::from(watch)) as Box<dyn WatchSource>);

        Self {
            provider,
            shared,
            fatal,
            process_name: config.process_name.clone(),
            policy: config.unresolved_scans,
            watch,
            predicate: Box::new(DefaultPredicate),
            listener: None,
            attachment: None,
            status: Status::NotRunning,
            previous: Watched::default(),
        }
    }

    pub fn set_watch(&mut self, watch: Box<dyn WatchSource>) {
        self.watch = Some(watch);
    }

    pub fn set_predicate(&mut self, predicate: Box<dyn TransitionPredicate>) {
        self.predicate = predicate;
    }

    pub fn set_listener(&mut self, listener: Box<dyn StatusListener>) {
        self.listener = Some(listener);
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Watched values as of the last tick.
    pub fn watched(&self) -> Watched {
        self.previous
    }

    pub fn attachment(&self) -> Option<&Arc<Attachment>> {
        self.attachment.as_ref()
    }

    fn is_alive(&self) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|attachment| attachment.process.is_alive())
    }

    /// Advance the state machine by one heartbeat. Returns the new status if it changed.
    pub fn tick(&mut self) -> Option<Status> {
        let next = match self.status {
            Status::NotRunning => self.try_attach(),
            Status::Stopped => Some(self.teardown()),
            _ if !self.is_alive() => Some(self.enter_stopped()),
            Status::Started => self.try_start(),
            Status::Running => self.poll(),
            Status::Reload | Status::NewGame => self.poll().or(Some(Status::Running)),
        };

        if let Some(status) = next {
            info!("Status: {} -> {}", self.status, status);
            self.status = status;
            self.shared.set_status(status);
            if let Some(listener) = self.listener.as_mut() {
                listener.status_changed(status);
            }
        }
        next
    }

    fn try_attach(&mut self) -> Option<Status> {
        let pid = self.provider.find_process_id(&self.process_name)?;
        let opened = match self.provider.open(pid) {
            Ok(opened) => opened,
            Err(e) => {
                debug!(
                    "Found {} (pid {}) but could not open it: {}",
                    self.process_name, pid, e
                );
                return None;
            }
        };

        let attachment = Arc::new(Attachment::new(
            opened.process,
            pid,
            opened.base_address,
            opened.module_size,
        ));
        if let Some(window) = self.provider.find_window(pid) {
            let _ = attachment.window.set(window);
        }

        self.shared.cache().invalidate_all();
        self.shared.scanner().reset();
        self.previous = Watched::default();

        info!(
            "Attached to {} (pid {}, base {:#x}, size {:#x})",
            self.process_name,
            pid,
            attachment.base_address,
            attachment.module_size()
        );
        self.attachment = Some(attachment);
        Some(Status::Started)
    }

    fn read_watched(&mut self, memory: &RemoteMemory<'_>) -> Watched {
        match self.watch.as_mut() {
            Some(watch) => watch.read(memory),
            None => Watched::default(),
        }
    }

    fn try_start(&mut self) -> Option<Status> {
        let attachment = self.attachment.clone()?;
        let shared = Arc::clone(&self.shared);
        let memory = RemoteMemory::new(Some(attachment.clone()), shared.cache());

        let watched = self.read_watched(&memory);
        if self.watch.is_some() && watched.entity_manager == 0 {
            return None;
        }

        let unresolved = shared.scanner().execute_scans(&memory);
        self.check_unresolved(unresolved);

        self.previous = watched;
        shared.publish(Some(attachment));
        Some(Status::Running)
    }

    fn poll(&mut self) -> Option<Status> {
        let attachment = self.attachment.clone()?;
        if attachment.window().is_none()
            && let Some(window) = self.provider.find_window(attachment.pid)
        {
            debug!("Captured window {:?}", window);
            let _ = attachment.window.set(window);
        }

        let shared = Arc::clone(&self.shared);
        let memory = RemoteMemory::new(Some(attachment), shared.cache());

        let pending = {
            let mut scanner = shared.scanner();
            scanner.has_pending().then(|| scanner.execute_scans(&memory))
        };
        if let Some(unresolved) = pending {
            self.check_unresolved(unresolved);
        }

        if self.watch.is_none() {
            return None;
        }
        let watched = self.read_watched(&memory);
        let transition = self.predicate.classify(&self.previous, &watched);
        self.previous = watched;

        let status = match transition? {
            Transition::Reload => Status::Reload,
            Transition::NewGame => Status::NewGame,
        };
        shared.cache().invalidate_all();
        Some(status)
    }

    fn check_unresolved(&self, unresolved: usize) {
        if unresolved == 0 {
            return;
        }
        match self.policy {
            UnresolvedScanPolicy::Ignore => {
                debug!("{} signature scans unresolved", unresolved)
            }
            UnresolvedScanPolicy::Warn => {
                warn!("{} signature scans unresolved; is this a supported build?", unresolved)
            }
            UnresolvedScanPolicy::Fatal => {
                self.fatal.raise(&Error::UnresolvedScans(unresolved).to_string())
            }
        }
    }

    fn enter_stopped(&mut self) -> Status {
        self.shared.publish(None);
        self.shared.cache().invalidate_all();
        info!("{} exited", self.process_name);
        Status::Stopped
    }

    fn teardown(&mut self) -> Status {
        self.shared.scanner().reset();
        self.shared.cache().invalidate_all();
        self.attachment = None;
        self.previous = Watched::default();
        Status::NotRunning
    }

    /// Drop the session without waiting for the process to exit.
    pub fn shutdown(&mut self) {
        self.shared.publish(None);
        self.shared.cache().invalidate_all();
        self.attachment = None;
        self.previous = Watched::default();
        if self.status != Status::NotRunning {
            self.status = Status::NotRunning;
            self.shared.set_status(Status::NotRunning);
            if let Some(listener) = self.listener.as_mut() {
                listener.status_changed(Status::NotRunning);
            }
        }
    }

    /// Heartbeat loop: tick every `period` until the shared signal stops it.
    pub fn run(&mut self, period: Duration) {
        let shared = Arc::clone(&self.shared);
        let signal = shared.signal();
        debug!("Heartbeat started ({:?})", period);

        loop {
            if signal.wait_while_paused(period) {
                break;
            }
            self.tick();
            if signal.wait(period) {
                break;
            }
        }

        self.shutdown();
        debug!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::{Decision, FatalContext, FatalReporter};
    use crate::memory::{MockMemoryBuilder, MockProcess, MockProvider, OffsetChain, WindowHandle};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: u64 = 0x1_4000_0000;
    const MODULE_SIZE: u64 = 0x1000;
    const ENTITY_MANAGER: u64 = BASE + 0x100;
    const LOAD_COUNTER: u64 = BASE + 0x108;
    const SIGNATURE: [u8; 4] = [0x0F, 0x1E, 0x2D, 0x3C];

    struct Harness {
        provider: Arc<MockProvider>,
        shared: Arc<SessionShared>,
        session: ProcessSession<MockProvider>,
    }

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .process_name("target.exe")
            .watch(OffsetChain::new([0x100]), OffsetChain::new([0x108]))
            .build()
    }

    fn harness_with(config: EngineConfig, reporter: Option<Box<dyn FatalReporter>>) -> Harness {
        let provider = Arc::new(MockProvider::new());
        let shared = Arc::new(SessionShared::new(config.scan_chunk_size));
        let fatal = Arc::new(FatalHandler::new(Arc::clone(&shared), reporter));
        let session =
            ProcessSession::new(Arc::clone(&provider), Arc::clone(&shared), fatal, &config);
        Harness {
            provider,
            shared,
            session,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), None)
    }

    fn launch(provider: &MockProvider, pid: u32) -> Arc<MockProcess> {
        let process = MockMemoryBuilder::new()
            .region(BASE, MODULE_SIZE as usize)
            .write_bytes(BASE + 0x800, &SIGNATURE)
            .build();
        provider.launch(pid, process.clone(), BASE, MODULE_SIZE);
        process
    }

    /// Tick until Running, returning every reported status.
    fn run_to_running(h: &mut Harness, process: &MockProcess) -> Vec<Status> {
        process.poke_u64(ENTITY_MANAGER, 0xAAAA_0000);
        (0..2).filter_map(|_| h.session.tick()).collect()
    }

    #[test]
    fn test_waits_for_process() {
        let mut h = harness();
        assert_eq!(h.session.tick(), None);
        assert_eq!(h.session.status(), Status::NotRunning);
    }

    #[test]
    fn test_start_waits_for_entity_manager() {
        let mut h = harness();
        launch(&h.provider, 10);

        assert_eq!(h.session.tick(), Some(Status::Started));
        assert_eq!(h.session.tick(), None);
        assert_eq!(h.session.status(), Status::Started);
        assert!(h.shared.attachment().is_none());
    }

    #[test]
    fn test_attach_runs_scans_before_publishing() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        let published_during_scan = Arc::new(Mutex::new(None));

        let shared = Arc::clone(&h.shared);
        let seen = Arc::clone(&published_during_scan);
        h.shared
            .scanner()
            .add_scan(SIGNATURE, move |hit| {
                *seen.lock().unwrap() = Some((hit.match_offset(), shared.attachment().is_some()));
            })
            .unwrap();

        assert_eq!(run_to_running(&mut h, &process), vec![Status::Started, Status::Running]);
        assert_eq!(*published_during_scan.lock().unwrap(), Some((0x800, false)));
        assert!(h.shared.attachment().is_some());
        assert_eq!(h.shared.status(), Status::Running);
        assert_eq!(h.shared.scanner().unresolved_count(), 0);
    }

    #[test]
    fn test_reload_sequence() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);

        process.poke_i32(LOAD_COUNTER, 1);
        assert_eq!(h.session.tick(), Some(Status::Reload));
        assert_eq!(h.session.tick(), Some(Status::Running));
        assert_eq!(h.session.tick(), None);
    }

    #[test]
    fn test_new_game_sequence() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);

        process.poke_u64(ENTITY_MANAGER, 0);
        assert_eq!(h.session.tick(), None);
        process.poke_u64(ENTITY_MANAGER, 0xBBBB_0000);
        process.poke_i32(LOAD_COUNTER, 1);
        assert_eq!(h.session.tick(), Some(Status::NewGame));
        assert_eq!(h.session.tick(), Some(Status::Running));
        assert_eq!(h.session.tick(), None);
    }

    #[test]
    fn test_new_game_right_after_reload() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);

        process.poke_i32(LOAD_COUNTER, 1);
        assert_eq!(h.session.tick(), Some(Status::Reload));

        process.poke_u64(ENTITY_MANAGER, 0xBBBB_0000);
        assert_eq!(h.session.tick(), Some(Status::NewGame));
        assert_eq!(h.session.tick(), Some(Status::Running));
        assert_eq!(h.session.tick(), None);
    }

    #[test]
    fn test_transition_invalidates_cache() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);

        let memory = h.shared.memory();
        memory.read_value::<i32>(&OffsetChain::new([0x200]));
        assert!(!h.shared.cache().is_empty());

        process.poke_i32(LOAD_COUNTER, 1);
        h.session.tick();
        assert!(h.shared.cache().is_empty());
    }

    #[test]
    fn test_restart_resets_cache_and_scans() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        h.shared.scanner().add_scan(SIGNATURE, |_| {}).unwrap();
        run_to_running(&mut h, &process);
        h.shared.memory().read_value::<i32>(&OffsetChain::new([0x200]));

        h.provider.terminate();
        assert_eq!(h.session.tick(), Some(Status::Stopped));
        assert!(h.shared.attachment().is_none());
        assert!(!h.shared.memory().is_attached());
        assert_eq!(h.session.tick(), Some(Status::NotRunning));
        assert_eq!(h.session.tick(), None);

        let restarted = launch(&h.provider, 11);
        assert_eq!(h.session.tick(), Some(Status::Started));
        assert!(h.shared.cache().is_empty());
        assert_eq!(h.shared.scanner().unresolved_count(), 1);
        assert_eq!(h.session.attachment().map(|a| a.pid), Some(11));

        assert_eq!(run_to_running(&mut h, &restarted), vec![Status::Running]);
        assert_eq!(h.shared.scanner().unresolved_count(), 0);
        assert_eq!(h.provider.opens(), 2);
    }

    #[test]
    fn test_scans_registered_later_run_next_tick() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        h.shared
            .scanner()
            .add_scan(SIGNATURE, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        h.session.tick();
        h.session.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_captured_lazily() {
        let mut h = harness();
        let process = launch(&h.provider, 10);
        run_to_running(&mut h, &process);
        assert_eq!(h.session.attachment().and_then(|a| a.window()), None);

        h.provider.set_window(Some(WindowHandle(0x4242)));
        h.session.tick();
        assert_eq!(
            h.session.attachment().and_then(|a| a.window()),
            Some(WindowHandle(0x4242))
        );
    }

    #[test]
    fn test_without_watch_runs_immediately() {
        let config = EngineConfig::builder().process_name("target.exe").build();
        let mut h = harness_with(config, None);
        launch(&h.provider, 10);

        assert_eq!(h.session.tick(), Some(Status::Started));
        assert_eq!(h.session.tick(), Some(Status::Running));
        assert_eq!(h.session.tick(), None);
    }

    #[test]
    fn test_custom_predicate() {
        let mut h = harness();
        h.session
            .set_predicate(Box::new(|prev: &Watched, cur: &Watched| {
                (cur.load_counter < prev.load_counter).then_some(Transition::NewGame)
            }));
        let process = launch(&h.provider, 10);
        process.poke_i32(LOAD_COUNTER, 5);
        run_to_running(&mut h, &process);

        process.poke_i32(LOAD_COUNTER, 6);
        assert_eq!(h.session.tick(), None);
        process.poke_i32(LOAD_COUNTER, 0);
        assert_eq!(h.session.tick(), Some(Status::NewGame));
    }

    #[test]
    fn test_fatal_policy_reports_unresolved_scans() {
        let config = EngineConfig::builder()
            .process_name("target.exe")
            .unresolved_scans(UnresolvedScanPolicy::Fatal)
            .build();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reports);
        let reporter = move |context: &FatalContext| {
            seen.lock().unwrap().push(context.message.clone());
            Decision::Continue
        };
        let mut h = harness_with(config, Some(Box::new(reporter)));
        h.shared.scanner().add_scan([0x99, 0x98, 0x97], |_| {}).unwrap();
        launch(&h.provider, 10);

        h.session.tick();
        assert_eq!(h.session.tick(), Some(Status::Running));
        assert_eq!(reports.lock().unwrap().len(), 1);
        assert!(reports.lock().unwrap()[0].contains("1 signature scans"));
        assert!(!h.shared.signal().is_paused());
    }

    #[test]
    fn test_run_stops_on_signal() {
        let mut h = harness();
        launch(&h.provider, 10);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&statuses);

        let shared = Arc::clone(&h.shared);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            shared.signal().trigger();
        });

        h.session
            .set_listener(Box::new(move |status: Status| recorded.lock().unwrap().push(status)));
        h.session.run(Duration::from_millis(1));
        stopper.join().unwrap();

        assert_eq!(statuses.lock().unwrap().first(), Some(&Status::Started));
        assert_eq!(h.shared.status(), Status::NotRunning);
        assert!(h.session.attachment().is_none());
    }
}
