//! Watched values polled every heartbeat.

use serde::{Deserialize, Serialize};

use crate::memory::{OffsetChain, RemoteMemory};

/// Last observed values that drive lifecycle detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watched {
    pub load_counter: i32,
    pub entity_manager: u64,
}

/// Reads the watched values from the target.
pub trait WatchSource: Send + 'static {
    fn read(&mut self, memory: &RemoteMemory<'_>) -> Watched;
}

/// Reads the watched values through two offset chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainWatch {
    pub entity_manager: OffsetChain,
    pub load_counter: OffsetChain,
}

impl WatchSource for ChainWatch {
    fn read(&mut self, memory: &RemoteMemory<'_>) -> Watched {
        Watched {
            load_counter: memory.read_value::<i32>(&self.load_counter),
            entity_manager: memory.read_value::<u64>(&self.entity_manager),
        }
    }
}

impl<F> WatchSource for F
where
    F: FnMut(&RemoteMemory<'_>) -> Watched + Send + 'static,
{
    fn read(&mut self, memory: &RemoteMemory<'_>) -> Watched {
        self(memory)
    }
}
