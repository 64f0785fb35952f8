use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Stop and pause control for the heartbeat thread.
///
/// Waits on this signal end early when the heartbeat is stopped, so shutdown
/// never has to sit out a full period.
pub struct HeartbeatSignal {
    stopped: AtomicBool,
    paused: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl HeartbeatSignal {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// Stop the heartbeat, waking all waiting threads.
    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Re-arm after a stop so the engine can be started again.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Suspend polling. The heartbeat finishes its current tick first.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait for the specified duration or until the heartbeat is stopped.
    ///
    /// Returns `true` if stopped, `false` if the wait completed normally.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }

        let guard = match self.mutex.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        let result = self
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_stopped());

        match result {
            Ok((_, timeout_result)) => !timeout_result.timed_out(),
            // Mutex poisoned, treat as stopped
            Err(_) => true,
        }
    }

    /// Block while paused, checking back every `poll`.
    ///
    /// Returns `true` if the heartbeat was stopped meanwhile.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        while self.is_paused() {
            if self.is_stopped() {
                return true;
            }
            let guard = match self.mutex.lock() {
                Ok(guard) => guard,
                Err(_) => return true,
            };
            let _ = self.condvar.wait_timeout_while(guard, poll, |_| {
                self.is_paused() && !self.is_stopped()
            });
        }
        self.is_stopped()
    }
}

impl Default for HeartbeatSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_initial_state() {
        let signal = HeartbeatSignal::new();
        assert!(!signal.is_stopped());
        assert!(!signal.is_paused());
    }

    #[test]
    fn test_trigger_and_reset() {
        let signal = HeartbeatSignal::new();
        signal.trigger();
        assert!(signal.is_stopped());
        signal.reset();
        assert!(!signal.is_stopped());
    }

    #[test]
    fn test_wait_timeout() {
        let signal = HeartbeatSignal::new();
        let start = Instant::now();
        let stopped = signal.wait(Duration::from_millis(50));
        let elapsed = start.elapsed();

        assert!(!stopped);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_wait_interrupted() {
        let signal = Arc::new(HeartbeatSignal::new());
        let signal_clone = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let stopped = signal_clone.wait(Duration::from_secs(10));
            (stopped, start.elapsed())
        });

        // Give the thread time to start waiting
        thread::sleep(Duration::from_millis(50));
        signal.trigger();

        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_resume_releases_paused_thread() {
        let signal = Arc::new(HeartbeatSignal::new());
        signal.pause();
        let signal_clone = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let stopped = signal_clone.wait_while_paused(Duration::from_secs(10));
            (stopped, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        signal.resume();

        let (stopped, elapsed) = handle.join().unwrap();
        assert!(!stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_stop_releases_paused_thread() {
        let signal = Arc::new(HeartbeatSignal::new());
        signal.pause();
        let signal_clone = Arc::clone(&signal);

        let handle = thread::spawn(move || signal_clone.wait_while_paused(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(50));
        signal.trigger();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_not_paused_returns_immediately() {
        let signal = HeartbeatSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_while_paused(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
