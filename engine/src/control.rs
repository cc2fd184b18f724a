//! Cooperative cancel and pause flags shared by one session.
//!
//! Workers consult the flags before dispatching each job. Cancellation is also
//! polled by the process runner and the portable strategy so in-flight work
//! can stop early; pause only holds back the next dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SessionControl {
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Wake dispatchers blocked on pause so they can observe the cancel.
        let _guard = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        self.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner()) = false;
        self.resumed.notify_all();
    }

    /// Block while paused. Returns `false` if the session was cancelled.
    pub fn wait_for_dispatch(&self) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *paused && !self.is_cancelled() {
            paused = match self.resumed.wait_timeout(paused, Duration::from_millis(250)) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        !self.is_cancelled()
    }
}
