//! In-process model of the host page.
//!
//! Every primitive the checkout widget can reach for lives in a named
//! [`Primitive`] slot, so interception is a matter of swapping the slot's
//! value and putting the original back later. The page is passed around
//! explicitly as an `Arc<Window>` rather than living in ambient globals.

mod document;

pub use document::{Document, Element, MutationObserver};

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use thiserror::Error;

pub type OpenFrameFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type OpenPopupFn = Arc<dyn Fn(&str) -> Option<PopupHandle> + Send + Sync>;
pub type ToggleModalFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type CreateElementFn = Arc<dyn Fn(&str) -> Element + Send + Sync>;
pub type AppendChildFn = Arc<dyn Fn(Element) + Send + Sync>;
pub type EntryPointFn = Arc<dyn Fn() -> Result<(), WidgetError> + Send + Sync>;
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;
/// Consulted before an element's `src` is assigned. Returning `true` means
/// the assignment was taken over and must not land on the element.
pub type SrcGuard = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Error thrown by the widget's own code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WidgetError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupHandle {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A named, replaceable page primitive.
pub struct Primitive<T> {
    name: &'static str,
    value: RwLock<T>,
}

impl<T: Clone> Primitive<T> {
    pub(crate) fn new(name: &'static str, value: T) -> Self {
        Self { name, value: RwLock::new(value) }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn get(&self) -> T { read(&self.value).clone() }

    /// Swaps in `value` and hands back whatever was installed before.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *write(&self.value), value)
    }
}

impl<T> fmt::Debug for Primitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive").field("name", &self.name).finish_non_exhaustive()
    }
}

/// One browser page: its primitives, globals, event target and navigation history.
pub struct Window {
    origin: String,
    document: Arc<Document>,
    pub popup_opener: Primitive<OpenPopupFn>,
    pub widget_frame: Primitive<Option<OpenFrameFn>>,
    pub modal_toggle: Primitive<Option<ToggleModalFn>>,
    entry_point: RwLock<Option<EntryPointFn>>,
    globals: Mutex<HashMap<String, Value>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventListener)>>>,
    next_listener: AtomicU64,
    navigations: Mutex<Vec<String>>,
    popups: Mutex<Vec<PopupHandle>>,
}

impl Window {
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        let origin = origin.into();
        Arc::new_cyclic(|weak: &Weak<Window>| {
            let page = weak.clone();
            let opener: OpenPopupFn = Arc::new(move |url: &str| {
                let handle = PopupHandle { url: url.to_string() };
                if let Some(window) = page.upgrade() {
                    lock(&window.popups).push(handle.clone());
                }
                Some(handle)
            });
            Self {
                origin,
                document: Document::new(),
                popup_opener: Primitive::new("window.open", opener),
                widget_frame: Primitive::new("OnePay.openPaymentFrame", None),
                modal_toggle: Primitive::new("modal.toggle", None),
                entry_point: RwLock::new(None),
                globals: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                navigations: Mutex::new(Vec::new()),
                popups: Mutex::new(Vec::new()),
            }
        })
    }

    pub fn origin(&self) -> &str { &self.origin }
    pub fn document(&self) -> &Arc<Document> { &self.document }

    /// Full-page navigation (`location.href = url`).
    pub fn navigate(&self, url: &str) {
        lock(&self.navigations).push(url.to_string());
    }

    pub fn location(&self) -> String {
        lock(&self.navigations).last().cloned().unwrap_or_else(|| self.origin.clone())
    }

    pub fn navigations(&self) -> Vec<String> { lock(&self.navigations).clone() }
    pub fn popups(&self) -> Vec<PopupHandle> { lock(&self.popups).clone() }

    pub fn open(&self, url: &str) -> Option<PopupHandle> {
        (self.popup_opener.get())(url)
    }

    /// Calls the widget's frame opener; `false` when the widget has none.
    pub fn open_widget_frame(&self, url: &str) -> bool {
        match self.widget_frame.get() {
            Some(open) => { open(url); true }
            None => false,
        }
    }

    pub fn toggle_modal(&self, url: &str) -> bool {
        match self.modal_toggle.get() {
            Some(toggle) => { toggle(url); true }
            None => false,
        }
    }

    pub fn register_widget_frame(&self, open: OpenFrameFn) { self.widget_frame.replace(Some(open)); }
    pub fn register_modal_toggle(&self, toggle: ToggleModalFn) { self.modal_toggle.replace(Some(toggle)); }

    pub fn register_entry_point(&self, entry: EntryPointFn) {
        *write(&self.entry_point) = Some(entry);
    }

    pub fn entry_point(&self) -> Option<EntryPointFn> { read(&self.entry_point).clone() }
    pub fn is_widget_ready(&self) -> bool { read(&self.entry_point).is_some() }

    pub fn set_global(&self, name: &str, value: Value) {
        lock(&self.globals).insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<Value> { lock(&self.globals).get(name).cloned() }

    pub fn add_event_listener(&self, event: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).entry(event.to_string()).or_default().push((id, listener));
        id
    }

    pub fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(registered) = listeners.get_mut(event) else { return false };
        let before = registered.len();
        registered.retain(|(registered_id, _)| *registered_id != id);
        before != registered.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).get(event).map_or(0, Vec::len)
    }

    /// Delivers `detail` to every listener registered for `event` and
    /// returns how many ran. Listeners may unsubscribe while being called.
    pub fn dispatch_event(&self, event: &str, detail: &Value) -> usize {
        let snapshot: Vec<EventListener> = lock(&self.listeners)
            .get(event)
            .map(|registered| registered.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();
        for listener in &snapshot {
            listener(detail);
        }
        snapshot.len()
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window").field("origin", &self.origin).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_popup_opener_records_popup() {
        let window = Window::new("https://shop.example");
        let handle = window.open("https://unrelated.example/x").unwrap();
        assert_eq!(handle.url, "https://unrelated.example/x");
        assert_eq!(window.popups().len(), 1);
        assert!(window.navigations().is_empty());
    }

    #[test]
    fn test_primitive_replace_returns_previous() {
        let window = Window::new("https://shop.example");
        let original = window.popup_opener.replace(Arc::new(|_: &str| None));
        assert!(window.open("https://a.example").is_none());
        window.popup_opener.replace(original);
        assert!(window.open("https://a.example").is_some());
        assert_eq!(window.popup_opener.name(), "window.open");
    }

    #[test]
    fn test_optional_widget_primitives() {
        let window = Window::new("https://shop.example");
        assert!(!window.open_widget_frame("https://a.example"));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        window.register_widget_frame(Arc::new(move |_: &str| { seen.fetch_add(1, Ordering::SeqCst); }));
        assert!(window.open_widget_frame("https://a.example"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_navigation_updates_location() {
        let window = Window::new("https://shop.example");
        assert_eq!(window.location(), "https://shop.example");
        window.navigate("https://gateway.example/pay");
        assert_eq!(window.location(), "https://gateway.example/pay");
    }

    #[test]
    fn test_event_dispatch_and_removal() {
        let window = Window::new("https://shop.example");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = window.add_event_listener("onePaySuccess", Arc::new(move |_: &Value| { counter.fetch_add(1, Ordering::SeqCst); }));
        assert_eq!(window.dispatch_event("onePaySuccess", &json!({})), 1);
        assert_eq!(window.dispatch_event("onePayFail", &json!({})), 0);
        assert!(window.remove_event_listener("onePaySuccess", id));
        assert!(!window.remove_event_listener("onePaySuccess", id));
        assert_eq!(window.dispatch_event("onePaySuccess", &json!({})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_dispatch() {
        let window = Window::new("https://shop.example");
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::default();
        let page = Arc::downgrade(&window);
        let own = Arc::clone(&slot);
        let id = window.add_event_listener("evt", Arc::new(move |_: &Value| {
            if let (Some(window), Some(id)) = (page.upgrade(), *lock(&own)) {
                window.remove_event_listener("evt", id);
            }
        }));
        *lock(&slot) = Some(id);
        assert_eq!(window.dispatch_event("evt", &json!(null)), 1);
        assert_eq!(window.listener_count("evt"), 0);
    }
}
