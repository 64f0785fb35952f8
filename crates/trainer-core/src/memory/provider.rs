use std::fmt;
use std::sync::Arc;

use crate::error::Result;

use super::ProcessMemory;

/// Opaque reference to a top-level window of the target.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowHandle({:#x})", self.0)
    }
}

/// A freshly opened target process.
pub struct OpenedProcess {
    pub process: Arc<dyn ProcessMemory>,
    pub base_address: u64,
    pub module_size: u64,
}

/// Process and window discovery.
///
/// The heartbeat uses this to find and open the target; the engine uses it for
/// the window helpers.
pub trait ProcessProvider: Send + Sync + 'static {
    fn find_process_id(&self, name: &str) -> Option<u32>;

    fn open(&self, pid: u32) -> Result<OpenedProcess>;

    fn find_window(&self, pid: u32) -> Option<WindowHandle>;

    fn bring_to_front(&self, window: WindowHandle) -> Result<()>;

    fn is_foreground(&self, window: WindowHandle) -> bool;
}
