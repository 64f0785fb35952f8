mod heartbeat;
mod lifecycle;
mod predicate;
mod shared;
mod status;
mod watch;

pub use heartbeat::HeartbeatSignal;
pub use lifecycle::ProcessSession;
pub use predicate::{DefaultPredicate, Transition, TransitionPredicate};
pub use shared::SessionShared;
pub use status::{SharedStatus, Status, StatusListener};
pub use watch::{ChainWatch, WatchSource, Watched};
