//! Navigation interception.
//!
//! [`NavigationInterceptionPort`] is the single capability every wrapped
//! primitive relies on: redirect the page if the target belongs to the
//! gateway. Each [`PrimitiveAdapter`] wraps one page primitive around that
//! port; when the port redirects, the original is not called at all, and
//! otherwise it is called unmodified.

use super::registry::{OriginalValue, OverrideRecord, PrimitiveTarget};
use crate::browser::{AppendChildFn, CreateElementFn, Element, OpenFrameFn, OpenPopupFn, ToggleModalFn, Window};
use crate::GatewayPolicy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

pub trait NavigationInterceptionPort: Send + Sync {
    /// Navigates the whole page to `target` if it matches the gateway
    /// policy. Returns whether it did.
    fn try_redirect(&self, target: &str) -> bool;
}

pub type RedirectHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Port implementation backed by a [`GatewayPolicy`] and a page.
pub struct GatewayRedirector {
    policy: GatewayPolicy,
    window: Weak<Window>,
    on_redirect: Option<RedirectHook>,
    redirects: AtomicUsize,
}

impl GatewayRedirector {
    pub fn new(policy: GatewayPolicy, window: &Arc<Window>) -> Self {
        Self { policy, window: Arc::downgrade(window), on_redirect: None, redirects: AtomicUsize::new(0) }
    }

    pub fn on_redirect(mut self, hook: RedirectHook) -> Self {
        self.on_redirect = Some(hook);
        self
    }

    pub fn redirects(&self) -> usize { self.redirects.load(Ordering::Relaxed) }
}

impl NavigationInterceptionPort for GatewayRedirector {
    fn try_redirect(&self, target: &str) -> bool {
        if !self.policy.is_gateway_target(target) {
            return false;
        }
        let Some(window) = self.window.upgrade() else { return false };
        info!(target, "forcing full-page navigation to payment gateway");
        window.navigate(target);
        self.redirects.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.on_redirect {
            hook(target);
        }
        true
    }
}

/// Wraps one page primitive. Returns `None` when the primitive is absent
/// on this page, in which case nothing was replaced.
pub trait PrimitiveAdapter: Send + Sync {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord>;
}

/// The widget's own "open payment frame" function.
pub struct WidgetFrameAdapter;

impl PrimitiveAdapter for WidgetFrameAdapter {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord> {
        let original = window.widget_frame.get()?;
        let (port, passthrough) = (Arc::clone(port), Arc::clone(&original));
        let wrapped: OpenFrameFn = Arc::new(move |url: &str| {
            if !port.try_redirect(url) {
                passthrough(url)
            }
        });
        window.widget_frame.replace(Some(wrapped));
        Some(OverrideRecord::new(PrimitiveTarget::Widget, window.widget_frame.name(), OriginalValue::WidgetFrame(original)))
    }
}

/// `window.open`.
pub struct PopupAdapter;

impl PrimitiveAdapter for PopupAdapter {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord> {
        let original = window.popup_opener.get();
        let (port, passthrough) = (Arc::clone(port), Arc::clone(&original));
        let wrapped: OpenPopupFn = Arc::new(move |url: &str| {
            if port.try_redirect(url) { None } else { passthrough(url) }
        });
        window.popup_opener.replace(wrapped);
        Some(OverrideRecord::new(PrimitiveTarget::Window, window.popup_opener.name(), OriginalValue::Popup(original)))
    }
}

/// A third-party modal toggle, when the page has one.
pub struct ModalAdapter;

impl PrimitiveAdapter for ModalAdapter {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord> {
        let original = window.modal_toggle.get()?;
        let (port, passthrough) = (Arc::clone(port), Arc::clone(&original));
        let wrapped: ToggleModalFn = Arc::new(move |url: &str| {
            if !port.try_redirect(url) {
                passthrough(url)
            }
        });
        window.modal_toggle.replace(Some(wrapped));
        Some(OverrideRecord::new(PrimitiveTarget::Modal, window.modal_toggle.name(), OriginalValue::Modal(original)))
    }
}

/// `document.createElement`; iframes come back with a guarded `src`.
pub struct ElementFactoryAdapter;

impl PrimitiveAdapter for ElementFactoryAdapter {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord> {
        let document = window.document();
        let original = document.element_factory.get();
        let (port, passthrough) = (Arc::clone(port), Arc::clone(&original));
        let wrapped: CreateElementFn = Arc::new(move |tag: &str| {
            let element = passthrough(tag);
            if tag.eq_ignore_ascii_case("iframe") {
                let port = Arc::clone(&port);
                element.guard_src(Arc::new(move |src: &str| port.try_redirect(src)));
            }
            element
        });
        document.element_factory.replace(wrapped);
        Some(OverrideRecord::new(PrimitiveTarget::Document, document.element_factory.name(), OriginalValue::ElementFactory(original)))
    }
}

/// `document.body.appendChild`; a subtree carrying a gateway target is
/// never inserted.
pub struct BodyAppendAdapter;

impl PrimitiveAdapter for BodyAppendAdapter {
    fn install(&self, window: &Arc<Window>, port: &Arc<dyn NavigationInterceptionPort>) -> Option<OverrideRecord> {
        let document = window.document();
        let original = document.body_append.get();
        let (port, passthrough) = (Arc::clone(port), Arc::clone(&original));
        let wrapped: AppendChildFn = Arc::new(move |node: Element| {
            if node.sources().iter().any(|src| port.try_redirect(src)) {
                return;
            }
            passthrough(node)
        });
        document.body_append.replace(wrapped);
        Some(OverrideRecord::new(PrimitiveTarget::Body, document.body_append.name(), OriginalValue::BodyAppend(original)))
    }
}

/// All five adapters, in install order.
pub fn default_adapters() -> Vec<Box<dyn PrimitiveAdapter>> {
    vec![
        Box::new(WidgetFrameAdapter),
        Box::new(PopupAdapter),
        Box::new(ModalAdapter),
        Box::new(ElementFactoryAdapter),
        Box::new(BodyAppendAdapter),
    ]
}
