//! Hydration gate.
//!
//! Readers must not render board contents until the stored document has been
//! loaded and merged. The gate has two states and one transition per load
//! cycle:
//!
//! ```text
//!   Loading ──mark_ready──▶ Ready
//!      ▲                      │
//!      └─────begin_cycle──────┘   (reload / reset)
//! ```
//!
//! The transition is observable three ways: [`HydrationGate::is_ready`],
//! one-shot callbacks via [`HydrationGate::on_ready`], and the awaitable
//! [`HydrationGate::wait_ready`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationState {
    Loading,
    Ready,
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

pub struct HydrationGate {
    state: watch::Sender<HydrationState>,
    callbacks: Mutex<Vec<ReadyCallback>>,
    cycle: AtomicU64,
}

impl Default for HydrationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HydrationGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(HydrationState::Loading);
        Self {
            state,
            callbacks: Mutex::new(Vec::new()),
            cycle: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> HydrationState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == HydrationState::Ready
    }

    /// Current load cycle, starting at 1.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Run `callback` once the gate is ready. Runs immediately if it already is.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self.lock_callbacks();
            if !self.is_ready() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Wait until the gate is ready.
    pub async fn wait_ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == HydrationState::Ready).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<HydrationState> {
        self.state.subscribe()
    }

    /// Open the gate. Returns `true` if this call made the transition,
    /// `false` if the gate was already open for this cycle.
    pub(crate) fn mark_ready(&self) -> bool {
        let pending = {
            let mut callbacks = self.lock_callbacks();
            let opened = self.state.send_if_modified(|state| {
                if *state == HydrationState::Ready {
                    return false;
                }
                *state = HydrationState::Ready;
                true
            });
            if !opened {
                return false;
            }
            std::mem::take(&mut *callbacks)
        };

        log::debug!(
            target: "tabboard.hydration",
            "Cycle {} ready ({} callbacks)",
            self.cycle(),
            pending.len()
        );
        for callback in pending {
            callback();
        }
        true
    }

    /// Close the gate for a new load cycle. Returns the new cycle number.
    pub(crate) fn begin_cycle(&self) -> u64 {
        let _callbacks = self.lock_callbacks();
        self.state.send_replace(HydrationState::Loading);
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, Vec<ReadyCallback>> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_starts_loading() {
        let gate = HydrationGate::new();
        assert!(!gate.is_ready());
        assert_eq!(gate.state(), HydrationState::Loading);
        assert_eq!(gate.cycle(), 1);
    }

    #[test]
    fn test_single_transition_per_cycle() {
        let gate = HydrationGate::new();
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(gate.is_ready());

        assert_eq!(gate.begin_cycle(), 2);
        assert!(!gate.is_ready());
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
    }

    #[test]
    fn test_callbacks_fire_once() {
        let gate = HydrationGate::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        gate.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        gate.mark_ready();
        gate.mark_ready();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A second cycle does not re-run callbacks from the first one.
        gate.begin_cycle();
        gate.mark_ready();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let gate = HydrationGate::new();
        gate.mark_ready();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        gate.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_on_transition() {
        let gate = Arc::new(HydrationGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_ready().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.mark_ready();
        waiter.await.unwrap();
        // Already ready: returns straight away.
        gate.wait_ready().await;
    }

    #[test]
    fn test_subscription_sees_transitions() {
        let gate = HydrationGate::new();
        let mut rx = gate.subscribe();
        assert_eq!(*rx.borrow_and_update(), HydrationState::Loading);
        gate.mark_ready();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), HydrationState::Ready);
    }
}
