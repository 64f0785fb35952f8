mod invoker;
mod stub;

pub use invoker::{DEFAULT_CALL_TIMEOUT, RemoteInvoker, ScratchTracker};
pub use stub::{CallArgs, FloatRegister, IntRegister, StubBuilder, call_stub};
