//! Out-of-process game trainer engine.
//!
//! Attaches to a running game by executable name, follows its lifecycle on a
//! background heartbeat, and gives callers pointer-chain reads and writes,
//! code signature scanning, and remote function invocation inside the target.

pub mod config;
pub mod engine;
pub mod error;
pub mod fatal;
pub mod invoke;
pub mod memory;
pub mod scan;
pub mod session;
pub mod window;

pub use config::{EngineConfig, EngineConfigBuilder, UnresolvedScanPolicy, WatchConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, Result};
pub use fatal::{CallStack, Decision, FatalContext, FatalHandler, FatalReporter};
pub use invoke::{CallArgs, RemoteInvoker};
pub use memory::{
    AddressCache, Attachment, OffsetChain, ProcessMemory, ProcessProvider, RemoteMemory,
    SystemProvider, WindowHandle,
};
pub use scan::{
    CodeSignature, Pattern, ResolvedOffsets, ScanFlow, ScanHit, SignatureScanner, SignatureSet,
    load_signatures, save_signatures,
};
pub use session::{
    ChainWatch, DefaultPredicate, Status, StatusListener, Transition, TransitionPredicate,
    WatchSource, Watched,
};
