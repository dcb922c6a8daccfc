//! Concurrency controller (§4.9.3, §5): an async equivalent of the
//! condition-variable controller the spec describes, per §9's "a
//! coroutine implementation is acceptable provided the condition-variable
//! concurrency controller is expressed as an async semaphore with the
//! same dynamic-capacity and toggle semantics". Grounded on a
//! `tokio::sync::Semaphore`-based worker gate pattern in `processor.rs`,
//! widened here with `tokio::sync::Notify` so `max_threads` can shrink and
//! grow at runtime and shutdown can toggle, neither of which a plain `Semaphore`
//! supports.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::info;

use crate::model::CancellationToken;

struct State {
    max_threads: usize,
    active_count: usize,
    shutdown_requested: bool,
}

/// Returned by `acquire`; either a slot was granted or the controller is
/// shutting down and the caller should drop its work.
pub enum Slot {
    Granted(SlotGuard),
    Dropped,
}

pub struct ConcurrencyController {
    state: Mutex<State>,
    notify: Notify,
    runtime_max: usize,
    cancellation: CancellationToken,
}

impl ConcurrencyController {
    pub fn new(initial_max_threads: usize, runtime_max: usize) -> Self {
        Self {
            state: Mutex::new(State {
                max_threads: initial_max_threads.clamp(1, runtime_max),
                active_count: 0,
                shutdown_requested: false,
            }),
            notify: Notify::new(),
            runtime_max,
            cancellation: CancellationToken::new(),
        }
    }

    /// The shared token the Transcoder Adapter consumes to recognize an
    /// immediate interrupt mid-transcode (§4.5).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn max_threads(&self) -> usize {
        self.state.lock().unwrap().max_threads
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active_count
    }

    pub fn shutdown_requested(&self) -> bool {
        self.state.lock().unwrap().shutdown_requested
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Waits while `active_count >= max_threads` and not shutting down; on
    /// wake either grants a slot or returns `Dropped` (shutdown).
    pub async fn acquire(self: &std::sync::Arc<Self>) -> Slot {
        loop {
            {
                let mut guard = self.state.lock().unwrap();
                if guard.shutdown_requested {
                    return Slot::Dropped;
                }
                if guard.active_count < guard.max_threads {
                    guard.active_count += 1;
                    return Slot::Granted(SlotGuard { controller: self.clone() });
                }
            }
            self.notify.notified().await;
        }
    }

    fn release(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.active_count = guard.active_count.saturating_sub(1);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Clamps `new_max` to `[1, runtime_max]` and wakes waiters (§4.9.3
    /// "Increase/decrease thread event").
    pub fn set_max_threads(&self, new_max: usize) -> usize {
        let mut guard = self.state.lock().unwrap();
        let clamped = new_max.clamp(1, self.runtime_max);
        let old = guard.max_threads;
        guard.max_threads = clamped;
        drop(guard);
        if clamped != old {
            info!(from = old, to = clamped, "thread cap changed");
            self.notify.notify_waiters();
        }
        clamped
    }

    /// Toggles graceful shutdown: sets it if unset, clears it (cancel) if
    /// already set. Returns the new state.
    pub fn toggle_shutdown(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        guard.shutdown_requested = !guard.shutdown_requested;
        let now = guard.shutdown_requested;
        drop(guard);
        self.notify.notify_waiters();
        now
    }

    /// Immediate interrupt: sets shutdown (not toggleable) and flips the
    /// process-wide cancellation flag consumed by the Transcoder Adapter.
    pub fn interrupt(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.shutdown_requested = true;
        drop(guard);
        self.cancellation.cancel();
        self.notify.notify_waiters();
    }
}

pub struct SlotGuard {
    controller: std::sync::Arc<ConcurrencyController>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.controller.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn acquire_blocks_until_a_slot_frees() {
        let controller = Arc::new(ConcurrencyController::new(1, 4));
        let slot1 = controller.acquire().await;
        assert!(matches!(slot1, Slot::Granted(_)));
        assert_eq!(controller.active_count(), 1);

        let controller2 = controller.clone();
        let handle = tokio::spawn(async move { controller2.acquire().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(slot1);
        let slot2 = handle.await.unwrap();
        assert!(matches!(slot2, Slot::Granted(_)));
    }

    #[tokio::test]
    async fn set_max_threads_clamps_to_runtime_bounds() {
        let controller = ConcurrencyController::new(2, 8);
        assert_eq!(controller.set_max_threads(0), 1);
        assert_eq!(controller.set_max_threads(100), 8);
        assert_eq!(controller.set_max_threads(5), 5);
    }

    #[tokio::test]
    async fn shutdown_toggles_and_drops_waiting_acquirers() {
        let controller = Arc::new(ConcurrencyController::new(1, 4));
        let _slot = controller.acquire().await;

        let controller2 = controller.clone();
        let handle = tokio::spawn(async move { controller2.acquire().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        controller.toggle_shutdown();
        assert!(controller.shutdown_requested());
        let slot = handle.await.unwrap();
        assert!(matches!(slot, Slot::Dropped));

        controller.toggle_shutdown();
        assert!(!controller.shutdown_requested());
    }

    #[tokio::test]
    async fn interrupt_sets_both_shutdown_and_cancellation_flag() {
        let controller = ConcurrencyController::new(2, 4);
        assert!(!controller.is_interrupted());
        controller.interrupt();
        assert!(controller.is_interrupted());
        assert!(controller.shutdown_requested());
    }
}
