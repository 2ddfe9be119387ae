//! Cooldown-based refresh debouncer
//!
//! The first request runs immediately and starts a cooldown window. Requests
//! arriving during the window are folded into a single trailing run when the
//! window ends, which starts a new window. The debouncer only tracks state;
//! the owning task sleeps until `deadline()` and calls `on_timer()`.

use std::time::Duration;
use tokio::time::Instant;

/// Cap for deadlines that would overflow the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + delay`, saturating far in the future instead of panicking
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug)]
pub struct Debouncer {
    cooldown: Duration,
    immediate: bool,
    /// End of the current cooldown window
    timer: Option<Instant>,
    /// A request arrived during the window
    execute_at_end_of_timer: bool,
}

impl Debouncer {
    pub fn new(cooldown: Duration, immediate: bool) -> Self {
        Self { cooldown, immediate, timer: None, execute_at_end_of_timer: false }
    }

    /// Register a request. Returns true if the caller should run now; the
    /// caller must then call `arm()` once the run completes.
    pub fn call(&mut self) -> bool {
        if self.timer.is_some() {
            self.execute_at_end_of_timer = true;
            return false;
        }
        if !self.immediate {
            self.execute_at_end_of_timer = true;
            self.arm();
            return false;
        }
        true
    }

    /// Start a cooldown window from now
    pub fn arm(&mut self) {
        self.timer = Some(deadline_after(self.cooldown));
    }

    /// When the owner should call `on_timer()`
    pub fn deadline(&self) -> Option<Instant> {
        self.timer
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.execute_at_end_of_timer
    }

    /// The window ended. Returns true if a trailing run is due; the caller
    /// must then call `arm()` once the run completes.
    pub fn on_timer(&mut self) -> bool {
        self.timer = None;
        std::mem::take(&mut self.execute_at_end_of_timer)
    }

    /// Drop the window and any pending request
    pub fn cancel(&mut self) {
        self.timer = None;
        self.execute_at_end_of_timer = false;
    }
}
