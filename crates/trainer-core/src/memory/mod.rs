mod backend;
mod cache;
mod chain;
mod process;
mod provider;
mod remote;

#[cfg(test)]
pub mod mock;

pub use backend::{ProcessMemory, ThreadOutcome, ThreadWait, classify_thread_wait};
pub use cache::AddressCache;
pub use chain::OffsetChain;
pub use process::*;
pub use provider::{OpenedProcess, ProcessProvider, WindowHandle};
pub use remote::{Attachment, RemoteMemory};

#[cfg(test)]
pub use mock::{MockExecution, MockMemoryBuilder, MockProcess, MockProvider};
