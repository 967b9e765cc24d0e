//! Coalesced "something changed, re-render" signal.

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};

/// Default coalescing window.
pub const DEFAULT_RENDER_WINDOW: Duration = Duration::from_millis(50);

/// Trailing-edge coalescing scheduler.
///
/// Every [`schedule`](Self::schedule) pushes the deadline to `now + window`,
/// so a burst fires once, `window` after its last call.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Coalescing window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// (Re)arm the deadline relative to `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Drop any pending deadline.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Pending deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a deadline is armed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and return `true` if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Render signal for the view layer.
///
/// Subscribers observe a render generation counter that is bumped once per
/// coalesced burst of [`notify`](Self::notify) calls.
#[derive(Debug)]
pub struct ViewNotifier {
    debouncer: Debouncer,
    renders: watch::Sender<u64>,
}

impl Default for ViewNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_WINDOW)
    }
}

impl ViewNotifier {
    /// Create a notifier with the given coalescing window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let (renders, _) = watch::channel(0);
        Self {
            debouncer: Debouncer::new(window),
            renders,
        }
    }

    /// Request a render.
    pub fn notify(&mut self) {
        self.debouncer.schedule(Instant::now());
    }

    /// Drop a pending render request.
    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }

    /// Pending render deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Fire the render signal if the window has elapsed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        if !self.debouncer.fire_if_due(now) {
            return false;
        }
        self.renders.send_modify(|generation| *generation += 1);
        tracing::trace!(generation = *self.renders.borrow(), "Render signalled");
        true
    }

    /// Resolve once the pending render is due. Never resolves when idle.
    pub async fn due(&self) {
        match self.debouncer.deadline() {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Subscribe to render generations.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.renders.subscribe()
    }

    /// Number of renders signalled so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.renders.borrow()
    }
}
