//! Outcome delivery from the widget's result signals.

use crate::browser::{EventListener, ListenerId, Window};
use crate::{PaymentResult, RedirectConfig};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::warn;

/// Caller-visible "payment in progress" flag.
#[derive(Clone, Debug)]
pub struct ProcessingFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ProcessingFlag {
    fn default() -> Self { Self::new() }
}

impl ProcessingFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, processing: bool) { self.tx.send_replace(processing); }
    pub fn is_processing(&self) -> bool { *self.tx.borrow() }
    pub fn subscribe(&self) -> watch::Receiver<bool> { self.tx.subscribe() }
}

/// Listens for the widget's success and failure signals on the page's
/// event target.
#[derive(Clone, Debug)]
pub struct OutcomeBridge {
    window: Arc<Window>,
    success_event: String,
    failure_event: String,
}

impl OutcomeBridge {
    pub fn new(window: Arc<Window>) -> Self {
        let defaults = RedirectConfig::default();
        Self { window, success_event: defaults.success_event, failure_event: defaults.failure_event }
    }

    pub fn from_config(window: Arc<Window>, config: &RedirectConfig) -> Self {
        Self { window, success_event: config.success_event.clone(), failure_event: config.failure_event.clone() }
    }

    pub fn success_event(&self) -> &str { &self.success_event }
    pub fn failure_event(&self) -> &str { &self.failure_event }

    /// Registers both listeners. Each signal resets processing first and
    /// then hands the result over. Keep the returned [`Subscription`] for
    /// as long as outcomes should be delivered.
    pub fn subscribe<S, F, P>(&self, on_success: S, on_failure: F, on_processing_change: P) -> Subscription
    where
        S: Fn(PaymentResult) + Send + Sync + 'static,
        F: Fn(PaymentResult) + Send + Sync + 'static,
        P: Fn(bool) + Send + Sync + 'static,
    {
        let processing: Arc<dyn Fn(bool) + Send + Sync> = Arc::new(on_processing_change);
        let success = relay(&self.success_event, Arc::clone(&processing), on_success);
        let failure = relay(&self.failure_event, processing, on_failure);
        let listeners = vec![
            (self.success_event.clone(), self.window.add_event_listener(&self.success_event, success)),
            (self.failure_event.clone(), self.window.add_event_listener(&self.failure_event, failure)),
        ];
        Subscription { window: Arc::downgrade(&self.window), listeners }
    }
}

fn relay<D>(event: &str, processing: Arc<dyn Fn(bool) + Send + Sync>, deliver: D) -> EventListener
where
    D: Fn(PaymentResult) + Send + Sync + 'static,
{
    let event = event.to_string();
    Arc::new(move |detail: &Value| match serde_json::from_value::<PaymentResult>(detail.clone()) {
        Ok(result) => {
            processing(false);
            deliver(result);
        }
        Err(error) => warn!(event = %event, %error, "discarding malformed payment signal"),
    })
}

/// Registered outcome listeners. Dropping it removes them.
#[must_use = "dropping a Subscription removes its listeners"]
#[derive(Debug)]
pub struct Subscription {
    window: Weak<Window>,
    listeners: Vec<(String, ListenerId)>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(window) = self.window.upgrade() else { return };
        for (event, id) in self.listeners.drain(..) {
            window.remove_event_listener(&event, id);
        }
    }
}
