//! Fatal-condition reporting.
//!
//! A fatal condition pauses the heartbeat, captures a call stack normalized to
//! this executable's image base, and asks the attached [`FatalReporter`]
//! whether to continue. Without a reporter the answer is always abort.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::session::SessionShared;

/// Exit code used when a fatal condition aborts the process.
pub const ABORT_EXIT_CODE: i32 = 3;

const MAX_FRAMES: usize = 62;

/// Answer of a [`FatalReporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
}

/// Call stack with every frame relative to the image base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<u64>,
}

impl CallStack {
    /// Normalize absolute return addresses against `base`.
    pub fn from_absolute(addresses: &[u64], base: u64) -> Self {
        Self {
            frames: addresses.iter().map(|a| a.wrapping_sub(base)).collect(),
        }
    }

    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Absolute addresses for an image loaded at `base`.
    pub fn regenerate(&self, base: u64) -> Vec<u64> {
        self.frames.iter().map(|f| f.wrapping_add(base)).collect()
    }

    /// Capture the current thread's stack.
    #[cfg(target_os = "windows")]
    pub fn capture() -> Self {
        use std::ffi::c_void;
        use windows::Win32::System::Diagnostics::Debug::RtlCaptureStackBackTrace;
        use windows::Win32::System::LibraryLoader::GetModuleHandleW;
        use windows::core::PCWSTR;

        let mut buffer: Vec<*mut c_void> = vec![std::ptr::null_mut(); MAX_FRAMES];
        // SAFETY: the buffer outlives the call; a null module name asks for
        // this executable.
        let (captured, base) = unsafe {
            let captured = RtlCaptureStackBackTrace(1, &mut buffer, None);
            let base = GetModuleHandleW(PCWSTR::null()).map_or(0, |m| m.0 as u64);
            (captured as usize, base)
        };

        let addresses: Vec<u64> = buffer[..captured.min(MAX_FRAMES)]
            .iter()
            .map(|frame| *frame as u64)
            .take_while(|&address| address != 0)
            .collect();
        Self::from_absolute(&addresses, base)
    }

    #[cfg(not(target_os = "windows"))]
    pub fn capture() -> Self {
        Self::default()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:#x}", frame)?;
        }
        Ok(())
    }
}

impl FromStr for CallStack {
    type Err = Error;

    /// Parse the space-separated form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let frames = s
            .split_whitespace()
            .map(|token| {
                let digits = token
                    .strip_prefix("0x")
                    .or_else(|| token.strip_prefix("0X"))
                    .unwrap_or(token);
                u64::from_str_radix(digits, 16)
                    .map_err(|e| Error::InvalidCallStack(format!("'{}': {}", token, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { frames })
    }
}

/// What the reporter is shown.
#[derive(Debug, Clone)]
pub struct FatalContext {
    pub message: String,
    pub stack: CallStack,
    pub captured_at: DateTime<Local>,
    /// Whether the target handle is still usable, i.e. continuing makes sense.
    pub session_valid: bool,
}

/// External collaborator that presents a fatal condition and decides what to do.
pub trait FatalReporter: Send + Sync {
    fn report_fatal(&self, context: &FatalContext) -> Decision;
}

impl<F> FatalReporter for F
where
    F: Fn(&FatalContext) -> Decision + Send + Sync,
{
    fn report_fatal(&self, context: &FatalContext) -> Decision {
        self(context)
    }
}

/// Routes fatal conditions to the reporter, one at a time.
pub struct FatalHandler {
    reporter: Option<Box<dyn FatalReporter>>,
    shared: Arc<SessionShared>,
    reporting: AtomicBool,
}

impl FatalHandler {
    pub fn new(shared: Arc<SessionShared>, reporter: Option<Box<dyn FatalReporter>>) -> Self {
        Self {
            reporter,
            shared,
            reporting: AtomicBool::new(false),
        }
    }

    pub fn has_reporter(&self) -> bool {
        self.reporter.is_some()
    }

    /// Whether a report is currently being shown.
    pub fn is_reporting(&self) -> bool {
        self.reporting.load(Ordering::SeqCst)
    }

    /// Report a fatal condition and return the decision.
    ///
    /// A condition raised while another is being reported is logged and
    /// continues. On abort, outstanding scratch allocations are released and
    /// the heartbeat stays paused.
    pub fn handle(&self, message: &str) -> Decision {
        if self.reporting.swap(true, Ordering::SeqCst) {
            warn!("Fatal condition while reporting another: {}", message);
            return Decision::Continue;
        }

        let signal = self.shared.signal();
        let was_paused = signal.is_paused();
        signal.pause();

        let context = FatalContext {
            message: message.to_string(),
            stack: CallStack::capture(),
            captured_at: Local::now(),
            session_valid: self.shared.is_session_handle_valid(),
        };
        error!("Fatal: {} [stack: {}]", context.message, context.stack);

        let decision = match &self.reporter {
            Some(reporter) => reporter.report_fatal(&context),
            None => Decision::Abort,
        };
        self.reporting.store(false, Ordering::SeqCst);

        match decision {
            Decision::Continue => {
                info!("Continuing after fatal condition");
                if !was_paused {
                    signal.resume();
                }
            }
            Decision::Abort => {
                let released = self.shared.scratch().drain();
                if released > 0 {
                    info!("Released {} in-flight scratch allocations", released);
                }
            }
        }
        decision
    }

    /// Like [`handle`](Self::handle), but terminates the process on abort.
    pub fn raise(&self, message: &str) {
        if self.handle(message) == Decision::Abort {
            error!("Aborting");
            std::process::exit(ABORT_EXIT_CODE);
        }
    }

    /// Route panics through this handler after the default hook has run.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            handler.raise(&info.to_string());
        }));
    }
}
