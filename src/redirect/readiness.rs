//! Readiness detection for the externally loaded widget script.

use crate::browser::Window;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScriptReadinessState {
    #[default]
    Pending,
    Ready,
    TimedOut,
}

impl ScriptReadinessState {
    pub fn is_terminal(&self) -> bool { !matches!(self, Self::Pending) }
}

/// Polls the page until the widget entry point becomes callable.
///
/// The state is published on a `watch` channel. Once it reaches `Ready` or
/// `TimedOut` it never changes again, and later calls to
/// [`await_readiness`](Self::await_readiness) return it without polling.
#[derive(Debug)]
pub struct ReadinessMonitor {
    window: Arc<Window>,
    state: watch::Sender<ScriptReadinessState>,
    polls: AtomicU64,
}

impl ReadinessMonitor {
    pub fn new(window: Arc<Window>) -> Self {
        let (state, _) = watch::channel(ScriptReadinessState::Pending);
        Self { window, state, polls: AtomicU64::new(0) }
    }

    pub fn state(&self) -> ScriptReadinessState { *self.state.borrow() }
    pub fn subscribe(&self) -> watch::Receiver<ScriptReadinessState> { self.state.subscribe() }
    pub fn polls(&self) -> u64 { self.polls.load(Ordering::Relaxed) }

    pub async fn await_readiness(&self, poll_interval: Duration, timeout: Duration) -> ScriptReadinessState {
        let current = self.state();
        if current.is_terminal() {
            return current;
        }

        let outcome = if self.poll() { ScriptReadinessState::Ready } else { self.poll_until(poll_interval, timeout).await };

        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() { return false; }
            *state = outcome;
            true
        });
        if changed {
            match outcome {
                ScriptReadinessState::Ready => info!(polls = self.polls(), "payment widget ready"),
                _ => warn!(timeout_ms = timeout.as_millis() as u64, "payment widget did not load in time"),
            }
        }
        self.state()
    }

    fn poll(&self) -> bool {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.window.is_widget_ready()
    }

    async fn poll_until(&self, poll_interval: Duration, timeout: Duration) -> ScriptReadinessState {
        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let period = poll_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Both timers are dropped on return, so nothing keeps polling.
        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => return ScriptReadinessState::TimedOut,
                _ = ticker.tick() => {
                    if self.poll() {
                        return ScriptReadinessState::Ready;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::WidgetError;

    #[tokio::test(start_paused = true)]
    async fn test_times_out_once_and_stops_polling() {
        let window = Window::new("https://shop.example");
        let monitor = ReadinessMonitor::new(window);
        let started = Instant::now();

        let state = monitor.await_readiness(Duration::from_millis(50), Duration::from_millis(200)).await;
        let elapsed = started.elapsed();

        assert_eq!(state, ScriptReadinessState::TimedOut);
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250), "{elapsed:?}");
        let polls = monitor.polls();
        assert_eq!(polls, 4);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.polls(), polls);
        assert_eq!(monitor.state(), ScriptReadinessState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_ready_when_entry_point_appears() {
        let window = Window::new("https://shop.example");
        let monitor = ReadinessMonitor::new(Arc::clone(&window));
        let mut updates = monitor.subscribe();

        let late = Arc::clone(&window);
        tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            late.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        });

        let state = monitor.await_readiness(Duration::from_millis(50), Duration::from_secs(30)).await;
        assert_eq!(state, ScriptReadinessState::Ready);
        assert_eq!(monitor.polls(), 4);
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), ScriptReadinessState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_is_sticky() {
        let window = Window::new("https://shop.example");
        let monitor = ReadinessMonitor::new(Arc::clone(&window));
        monitor.await_readiness(Duration::from_millis(10), Duration::from_millis(30)).await;
        let polls = monitor.polls();

        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let state = monitor.await_readiness(Duration::from_millis(10), Duration::from_millis(30)).await;
        assert_eq!(state, ScriptReadinessState::TimedOut);
        assert_eq!(monitor.polls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_loaded_script_is_ready_on_first_poll() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let monitor = ReadinessMonitor::new(window);
        assert_eq!(monitor.await_readiness(Duration::from_millis(100), Duration::from_secs(30)).await, ScriptReadinessState::Ready);
        assert_eq!(monitor.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_sees_loaded_script() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let monitor = ReadinessMonitor::new(window);
        assert_eq!(monitor.await_readiness(Duration::from_millis(100), Duration::ZERO).await, ScriptReadinessState::Ready);

        let empty = ReadinessMonitor::new(Window::new("https://shop.example"));
        assert_eq!(empty.await_readiness(Duration::from_millis(100), Duration::ZERO).await, ScriptReadinessState::TimedOut);
        assert_eq!(empty.polls(), 1);
    }
}
