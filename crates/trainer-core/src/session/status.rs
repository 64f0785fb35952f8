use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

/// Lifecycle state of the attached target.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    IntoStaticStr,
    Display,
    FromRepr,
)]
#[repr(u8)]
pub enum Status {
    #[default]
    NotRunning = 0,
    Started = 1,
    Running = 2,
    /// Same game session, new level or area. Lasts one heartbeat.
    Reload = 3,
    /// A new game session began. Lasts one heartbeat.
    NewGame = 4,
    Stopped = 5,
}

impl Status {
    /// Whether callers may be serviced by a published session in this state.
    pub fn is_live(self) -> bool {
        matches!(self, Status::Running | Status::Reload | Status::NewGame)
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Status::Reload | Status::NewGame)
    }
}

/// Status shared between the heartbeat thread and callers.
#[derive(Debug, Default)]
pub struct SharedStatus(AtomicU8);

impl SharedStatus {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> Status {
        Status::from_repr(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Receives every status change, on the heartbeat thread.
pub trait StatusListener: Send + 'static {
    fn status_changed(&mut self, status: Status);
}

impl<F> StatusListener for F
where
    F: FnMut(Status) + Send + 'static,
{
    fn status_changed(&mut self, status: Status) {
        self(status)
    }
}
