//! Override registry.
//!
//! Installs the interception adapters over the page's primitives, keeps one
//! [`OverrideRecord`] per replaced primitive, and hands back a
//! [`TeardownHandle`] that puts every original back exactly once.

use super::interception::{default_adapters, NavigationInterceptionPort, PrimitiveAdapter};
use super::watcher::MutationWatcher;
use crate::browser::{lock, AppendChildFn, CreateElementFn, OpenFrameFn, OpenPopupFn, ToggleModalFn, Window};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_WATCH_WINDOW: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveTarget { Widget, Window, Modal, Document, Body }

/// The value a primitive held before it was wrapped.
pub(crate) enum OriginalValue {
    WidgetFrame(OpenFrameFn),
    Popup(OpenPopupFn),
    Modal(ToggleModalFn),
    ElementFactory(CreateElementFn),
    BodyAppend(AppendChildFn),
}

pub struct OverrideRecord {
    target: PrimitiveTarget,
    name: &'static str,
    original: OriginalValue,
}

impl OverrideRecord {
    pub(crate) fn new(target: PrimitiveTarget, name: &'static str, original: OriginalValue) -> Self {
        Self { target, name, original }
    }

    pub fn target(&self) -> PrimitiveTarget { self.target }
    pub fn name(&self) -> &'static str { self.name }

    /// Consumes the record, so a record cannot be restored twice.
    fn restore(self, window: &Window) {
        let document = window.document();
        match self.original {
            OriginalValue::WidgetFrame(f) => { window.widget_frame.replace(Some(f)); }
            OriginalValue::Popup(f) => { window.popup_opener.replace(f); }
            OriginalValue::Modal(f) => { window.modal_toggle.replace(Some(f)); }
            OriginalValue::ElementFactory(f) => { document.element_factory.replace(f); }
            OriginalValue::BodyAppend(f) => { document.body_append.replace(f); }
        }
        debug!(primitive = self.name, "primitive restored");
    }
}

/// Forwards to the session's port until teardown. Wrappers that outlive the
/// overrides, like the `src` guard on an iframe created mid-session, then
/// fall through to the original behaviour.
struct ArmedPort {
    inner: Arc<dyn NavigationInterceptionPort>,
    armed: Arc<AtomicBool>,
}

impl NavigationInterceptionPort for ArmedPort {
    fn try_redirect(&self, target: &str) -> bool {
        self.armed.load(Ordering::Acquire) && self.inner.try_redirect(target)
    }
}

impl fmt::Debug for OverrideRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideRecord").field("target", &self.target).field("name", &self.name).finish()
    }
}

pub struct OverrideRegistry {
    window: Arc<Window>,
    adapters: Vec<Box<dyn PrimitiveAdapter>>,
    watch_window: Duration,
}

impl OverrideRegistry {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window, adapters: default_adapters(), watch_window: DEFAULT_WATCH_WINDOW }
    }

    pub fn with_watch_window(mut self, watch_window: Duration) -> Self {
        self.watch_window = watch_window;
        self
    }

    pub fn with_adapters(mut self, adapters: Vec<Box<dyn PrimitiveAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Wraps every present primitive around `port` and starts the bounded
    /// mutation watch.
    pub fn install(&self, port: Arc<dyn NavigationInterceptionPort>) -> TeardownHandle {
        let armed = Arc::new(AtomicBool::new(true));
        let port: Arc<dyn NavigationInterceptionPort> = Arc::new(ArmedPort { inner: port, armed: Arc::clone(&armed) });
        let records: Vec<OverrideRecord> = self.adapters.iter().filter_map(|adapter| adapter.install(&self.window, &port)).collect();
        let watcher = MutationWatcher::spawn(self.window.document(), port, self.watch_window);
        debug!(installed = records.len(), watching = watcher.is_some(), "navigation overrides installed");
        TeardownHandle {
            inner: Arc::new(TeardownState {
                window: Arc::clone(&self.window),
                installed: records.len(),
                armed,
                records: Mutex::new(records),
                watcher: Mutex::new(watcher),
                done: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for OverrideRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideRegistry").field("adapters", &self.adapters.len()).field("watch_window", &self.watch_window).finish()
    }
}

/// Restores everything one `install` replaced. Cheap to clone; every clone
/// shares the same records.
#[derive(Clone, Debug)]
pub struct TeardownHandle {
    inner: Arc<TeardownState>,
}

#[derive(Debug)]
struct TeardownState {
    window: Arc<Window>,
    installed: usize,
    armed: Arc<AtomicBool>,
    records: Mutex<Vec<OverrideRecord>>,
    watcher: Mutex<Option<MutationWatcher>>,
    done: AtomicBool,
}

impl TeardownHandle {
    /// Restores in reverse install order and stops the mutation watch.
    /// Returns how many primitives this call restored; repeat calls return 0.
    pub fn teardown(&self) -> usize {
        self.inner.armed.store(false, Ordering::Release);
        let records = std::mem::take(&mut *lock(&self.inner.records));
        if let Some(watcher) = lock(&self.inner.watcher).take() {
            watcher.stop();
        }
        let restored = records.len();
        for record in records.into_iter().rev() {
            record.restore(&self.inner.window);
        }
        if !self.inner.done.swap(true, Ordering::AcqRel) {
            info!(restored, "navigation overrides restored");
        }
        restored
    }

    pub fn installed(&self) -> usize { self.inner.installed }
    pub fn pending(&self) -> usize { lock(&self.inner.records).len() }
    pub fn is_torn_down(&self) -> bool { self.inner.done.load(Ordering::Acquire) }

    pub fn is_watching(&self) -> bool {
        lock(&self.inner.watcher).as_ref().map_or(false, MutationWatcher::is_active)
    }
}
