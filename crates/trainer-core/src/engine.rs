//! The engine: heartbeat thread plus the caller-facing API.
//!
//! # Example
//!
//! ```no_run
//! use trainer_core::{Engine, EngineConfig, OffsetChain};
//!
//! let config = EngineConfig::builder().process_name("game.exe").build();
//! let mut engine = Engine::new(config);
//! engine.start()?;
//!
//! let health: f32 = engine.read_value(&OffsetChain::new([0x5B28C0, 0x18, 0x2B4]));
//! println!("health: {}", health);
//! # Ok::<(), trainer_core::Error>(())
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytemuck::Pod;
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fatal::{FatalHandler, FatalReporter};
use crate::invoke::{CallArgs, RemoteInvoker};
use crate::memory::{OffsetChain, ProcessProvider, RemoteMemory, SystemProvider};
use crate::scan::{Pattern, ResolvedOffsets, ScanFlow, ScanHit, SignatureSet};
use crate::session::{
    ProcessSession, SessionShared, Status, StatusListener, TransitionPredicate, WatchSource,
};

/// Attaches to the target and services reads, writes, scans and calls.
pub struct Engine<P: ProcessProvider = SystemProvider> {
    config: EngineConfig,
    provider: Arc<P>,
    shared: Arc<SessionShared>,
    fatal: Arc<FatalHandler>,
    invoker: RemoteInvoker,
    idle: Option<ProcessSession<P>>,
    heartbeat: Option<JoinHandle<ProcessSession<P>>>,
}

impl Engine<SystemProvider> {
    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> EngineBuilder<SystemProvider> {
        EngineBuilder::new(SystemProvider)
    }
}

impl<P: ProcessProvider> Engine<P> {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn fatal(&self) -> &Arc<FatalHandler> {
        &self.fatal
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Start the heartbeat thread. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.heartbeat.is_some() {
            return Ok(());
        }
        let mut session = self
            .idle
            .take()
            .ok_or_else(|| Error::HeartbeatFailed("session lost after a panic".to_string()))?;

        self.shared.signal().reset();
        let period = self.config.heartbeat();
        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                session.run(period);
                session
            })?;

        self.heartbeat = Some(handle);
        Ok(())
    }

    /// Stop the heartbeat thread and detach.
    pub fn stop(&mut self) {
        let Some(handle) = self.heartbeat.take() else {
            return;
        };
        self.shared.signal().trigger();
        match handle.join() {
            Ok(session) => self.idle = Some(session),
            Err(_) => error!("Heartbeat thread panicked"),
        }
    }

    /// Run one heartbeat on the calling thread. Only available while stopped.
    pub fn tick(&mut self) -> Option<Status> {
        self.idle.as_mut().and_then(ProcessSession::tick)
    }

    /// Poll until callers can be serviced or `timeout` elapses.
    pub fn wait_until_live(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.status().is_live() && self.shared.attachment().is_some() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.heartbeat());
        }
    }

    pub fn pause_heartbeat(&self) {
        debug!("Heartbeat paused");
        self.shared.signal().pause();
    }

    pub fn resume_heartbeat(&self) {
        debug!("Heartbeat resumed");
        self.shared.signal().resume();
    }

    pub fn is_session_handle_valid(&self) -> bool {
        self.shared.is_session_handle_valid()
    }

    /// Snapshot of the published session for a batch of operations.
    pub fn memory(&self) -> RemoteMemory<'_> {
        self.shared.memory()
    }

    pub fn read<T: Pod>(&self, chain: &OffsetChain, count: usize) -> Vec<T> {
        self.memory().read(chain, count)
    }

    pub fn read_value<T: Pod>(&self, chain: &OffsetChain) -> T {
        self.memory().read_value(chain)
    }

    pub fn try_read<T: Pod>(&self, chain: &OffsetChain, count: usize) -> Result<Vec<T>> {
        self.memory().try_read(chain, count)
    }

    pub fn write<T: Pod>(&self, chain: &OffsetChain, data: &[T]) -> Result<()> {
        self.memory().write(chain, data)
    }

    pub fn read_string(&self, chain: &OffsetChain) -> String {
        self.memory().read_string(chain)
    }

    pub fn write_string(&self, chain: &OffsetChain, text: &str) -> Result<()> {
        self.memory().write_string(chain, text)
    }

    /// Register a fire-once scan. It runs on the next heartbeat if a session is live.
    pub fn register_scan<F>(&self, pattern: impl Into<Pattern>, callback: F) -> Result<()>
    where
        F: FnMut(&ScanHit<'_>) + Send + 'static,
    {
        self.shared.scanner().add_scan(pattern, callback)
    }

    pub fn register_scan_with_continuation<F>(
        &self,
        pattern: impl Into<Pattern>,
        callback: F,
    ) -> Result<()>
    where
        F: FnMut(&ScanHit<'_>) -> ScanFlow + Send + 'static,
    {
        self.shared
            .scanner()
            .add_scan_with_continuation(pattern, callback)
    }

    pub fn register_signatures(&self, signatures: &SignatureSet) -> Result<ResolvedOffsets> {
        signatures.register(&mut self.shared.scanner())
    }

    /// Run unresolved scans now, on the calling thread.
    pub fn execute_scans(&self) -> usize {
        let memory = self.memory();
        self.shared.scanner().execute_scans(&memory)
    }

    pub fn call(&self, address: u64, args: &CallArgs) -> Result<i32> {
        self.invoker.call(&self.memory(), address, args)
    }

    pub fn call_with_string(&self, address: u64, text: &str) -> Result<i32> {
        self.invoker.call_with_string(&self.memory(), address, text)
    }

    pub fn bring_to_front(&self) -> Result<()> {
        let attachment = self.shared.attachment().ok_or(Error::NotAttached)?;
        let window = match attachment.window() {
            Some(window) => window,
            None => match self.provider.find_window(attachment.pid) {
                Some(window) => *attachment.window.get_or_init(|| window),
                None => {
                    debug!("No window yet for pid {}", attachment.pid);
                    return Ok(());
                }
            },
        };
        self.provider.bring_to_front(window)
    }

    pub fn is_foreground(&self) -> bool {
        self.shared
            .attachment()
            .and_then(|attachment| attachment.window())
            .is_some_and(|window| self.provider.is_foreground(window))
    }

    /// Route panics in this process through the fatal handler.
    pub fn install_panic_hook(&self) {
        self.fatal.install_panic_hook();
    }
}

impl<P: ProcessProvider> Drop for Engine<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<P: ProcessProvider> {
    provider: P,
    config: EngineConfig,
    watch: Option<Box<dyn WatchSource>>,
    predicate: Option<Box<dyn TransitionPredicate>>,
    listener: Option<Box<dyn StatusListener>>,
    reporter: Option<Box<dyn FatalReporter>>,
}

impl<P: ProcessProvider> EngineBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: EngineConfig::default(),
            watch: None,
            predicate: None,
            listener: None,
            reporter: None,
        }
    }

    /// Swap the process provider, keeping everything else.
    pub fn provider<Q: ProcessProvider>(self, provider: Q) -> EngineBuilder<Q> {
        EngineBuilder {
            provider,
            config: self.config,
            watch: self.watch,
            predicate: self.predicate,
            listener: self.listener,
            reporter: self.reporter,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Custom source of watched values, replacing the configured chains.
    pub fn watch(mut self, watch: impl WatchSource) -> Self {
        self.watch = Some(Box::new(watch));
        self
    }

    pub fn predicate(mut self, predicate: impl TransitionPredicate) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn listener(mut self, listener: impl StatusListener) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn reporter(mut self, reporter: impl FatalReporter + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    pub fn build(self) -> Engine<P> {
        let provider = Arc::new(self.provider);
        let shared = Arc::new(SessionShared::new(self.config.scan_chunk_size));
        let fatal = Arc::new(FatalHandler::new(Arc::clone(&shared), self.reporter));
        let invoker =
            RemoteInvoker::with_tracker(self.config.call_timeout(), Arc::clone(shared.scratch()));
        shared.scanner().set_invoker(invoker.clone());

        let mut session = ProcessSession::new(
            Arc::clone(&provider),
            Arc::clone(&shared),
            Arc::clone(&fatal),
            &self.config,
        );
        if let Some(watch) = self.watch {
            session.set_watch(watch);
        }
        if let Some(predicate) = self.predicate {
            session.set_predicate(predicate);
        }
        if let Some(listener) = self.listener {
            session.set_listener(listener);
        }

        Engine {
            config: self.config,
            provider,
            shared,
            fatal,
            invoker,
            idle: Some(session),
            heartbeat: None,
        }
    }
}
