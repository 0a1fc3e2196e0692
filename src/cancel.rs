//! Cancellation tokens and the termination watchdog (spec.md §5, §4.G
//! "Termination hook").
//!
//! No teacher counterpart (the teacher never runs an interpreter loop to
//! cancel); shaped like the conventional Rust cancellation-token +
//! background-thread pattern, matching this crate's own `std::sync`-based
//! concurrency story elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// The reason a watchdog fired, mapped onto an exit code by the store
/// (spec.md §7 "Cancelled / deadline").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl CancelReason {
    pub fn exit_code(self) -> i32 {
        match self {
            CancelReason::Cancelled => 1,
            CancelReason::DeadlineExceeded => 2,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    condvar: Condvar,
}

/// A cooperative cancellation signal, supplied by the caller of an
/// exported function invocation (spec.md §5 "Cancellation").
#[derive(Debug, Clone)]
pub struct CancellationToken(Arc<Inner>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner::default()))
    }

    /// A token that is never cancelled. Used when `ensure_termination`
    /// is off and the embedder passes no token.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.fire(CancelReason::Cancelled);
    }

    fn fire(&self, reason: CancelReason) {
        let mut guard = self.0.reason.lock().unwrap();
        if guard.is_none() {
            *guard = Some(reason);
            self.0.fired.store(true, Ordering::SeqCst);
            self.0.condvar.notify_all();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.0.fired.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.0.reason.lock().unwrap()
    }

    /// Blocks the calling (watchdog) thread until either the token fires
    /// or `deadline` elapses, returning the reason in either case.
    fn wait(&self, deadline: Option<Duration>) -> Option<CancelReason> {
        let guard = self.0.reason.lock().unwrap();
        if let Some(reason) = *guard {
            return Some(reason);
        }
        let (mut guard, timed_out) = match deadline {
            Some(d) => {
                let (g, result) = self.0.condvar.wait_timeout(guard, d).unwrap();
                (g, result.timed_out())
            }
            None => (self.0.condvar.wait(guard).unwrap(), false),
        };
        if guard.is_none() && timed_out {
            *guard = Some(CancelReason::DeadlineExceeded);
            self.0.fired.store(true, Ordering::SeqCst);
        }
        *guard
    }

    /// Like `wait`, but also wakes once `released` flips to true, polling
    /// at a short interval instead of blocking indefinitely. Used by the
    /// watchdog thread so a call that returns normally without ever being
    /// cancelled doesn't leave its `WatchdogGuard::drop` joining a thread
    /// that would otherwise wait forever on a token that will never fire.
    fn wait_releasable(&self, deadline: Option<Duration>, released: &AtomicBool) -> Option<CancelReason> {
        const POLL_INTERVAL: Duration = Duration::from_millis(20);
        let start = std::time::Instant::now();
        let mut guard = self.0.reason.lock().unwrap();
        loop {
            if let Some(reason) = *guard {
                return Some(reason);
            }
            if released.load(Ordering::SeqCst) {
                return None;
            }
            let slice = match deadline {
                Some(d) => {
                    let elapsed = start.elapsed();
                    if elapsed >= d {
                        *guard = Some(CancelReason::DeadlineExceeded);
                        self.0.fired.store(true, Ordering::SeqCst);
                        return Some(CancelReason::DeadlineExceeded);
                    }
                    (d - elapsed).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            let (g, _result) = self.0.condvar.wait_timeout(guard, slice).unwrap();
            guard = g;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::none()
    }
}

/// Spawns the background watchdog described in spec.md §4.G: waits on
/// `token`, and on fire stores `reason.exit_code()` into `close_state`'s
/// bit layout (bit 0 closed, bits 32..64 exit code — spec.md §3 "Close-
/// state word"). Dropping the returned guard releases the watchdog
/// early on normal return, per spec.md §5 "released via a cancel
/// channel on normal return".
pub fn spawn_watchdog(
    token: CancellationToken,
    deadline: Option<Duration>,
    close_state: Arc<std::sync::atomic::AtomicU64>,
) -> WatchdogGuard {
    let released = Arc::new(AtomicBool::new(false));
    let released_for_thread = released.clone();
    let handle = std::thread::Builder::new()
        .name("wasm-watchdog".into())
        .spawn(move || {
            if let Some(reason) = token.wait_releasable(deadline, &released_for_thread) {
                if !released_for_thread.load(Ordering::SeqCst) {
                    let word = 1u64 | (u64::from(u32::from_ne_bytes(reason.exit_code().to_ne_bytes())) << 32);
                    let _ = close_state.compare_exchange(
                        0,
                        word,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
            }
        })
        .expect("failed to spawn watchdog thread");

    WatchdogGuard {
        released,
        handle: Some(handle),
    }
}

pub struct WatchdogGuard {
    released: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_wakes_a_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait(None));
        std::thread::sleep(Duration::from_millis(10));
        token.cancel();
        assert_eq!(handle.join().unwrap(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn deadline_fires_on_timeout() {
        let token = CancellationToken::new();
        let reason = token.wait(Some(Duration::from_millis(5)));
        assert_eq!(reason, Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn watchdog_guard_drop_does_not_hang_when_never_cancelled() {
        let token = CancellationToken::new();
        let close_state = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let guard = spawn_watchdog(token, None, close_state.clone());
        drop(guard);
        assert_eq!(close_state.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn watchdog_writes_close_state_on_cancel() {
        let token = CancellationToken::new();
        let close_state = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let guard = spawn_watchdog(token.clone(), None, close_state.clone());
        token.cancel();
        drop(guard);
        let word = close_state.load(Ordering::SeqCst);
        assert_eq!(word & 1, 1);
    }
}
