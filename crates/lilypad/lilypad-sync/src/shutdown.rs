//! Process-local manual-reset event used to stop a background loop.

use std::io;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Manual-reset event: once set, every current and future wait returns
/// [`WaitOutcome::Signaled`] immediately.
#[derive(Default)]
pub struct ShutdownEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
}

fn poisoned() -> io::Error {
    io::Error::other("shutdown event lock poisoned")
}

impl ShutdownEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) -> io::Result<()> {
        let mut signaled = self.signaled.lock().map_err(|_| poisoned())?;
        *signaled = true;
        self.cv.notify_all();
        Ok(())
    }

    /// Waits until the event is set or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock().map_err(|_| poisoned())?;
        loop {
            if *signaled {
                return Ok(WaitOutcome::Signaled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            // spurious wakeups loop back through the deadline check
            signaled = self
                .cv
                .wait_timeout(signaled, deadline - now)
                .map_err(|_| poisoned())?
                .0;
        }
    }
}
