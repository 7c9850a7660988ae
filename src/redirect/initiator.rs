//! Payment session initiation.
//!
//! `initiate()` checks its preconditions before touching the page, then
//! writes the payload, installs the overrides, calls the widget entry point
//! and schedules the backstop restoration. Outcomes arrive later: as a
//! forced navigation, through the result signals, or not at all, in which
//! case the backstop still restores the page.

use super::interception::GatewayRedirector;
use super::outcome::{OutcomeBridge, ProcessingFlag, Subscription};
use super::readiness::{ReadinessMonitor, ScriptReadinessState};
use super::registry::{OverrideRegistry, TeardownHandle};
use crate::browser::{lock, Window};
use crate::config::CredentialSource;
use crate::domain::aggregates::{PaymentSession, SessionError};
use crate::domain::events::SessionEvent;
use crate::{CallbackUrl, GatewayPolicy, GlobalPaymentPayload, PaymentResult, PaymentSessionRequest, RedirectConfig, RedirectError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type StallHandler = Arc<dyn Fn(Uuid) + Send + Sync>;

/// Most recent sessions kept for [`PaymentSessionInitiator::session`].
pub const SESSION_HISTORY: usize = 16;

/// A session plus the channel its events are published on.
struct SessionCell {
    session: Mutex<PaymentSession>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCell {
    fn update<R>(&self, f: impl FnOnce(&mut PaymentSession) -> R) -> R {
        let (out, events) = {
            let mut session = lock(&self.session);
            let out = f(&mut session);
            (out, session.take_events())
        };
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        out
    }

    fn transition(&self, f: impl FnOnce(&mut PaymentSession) -> std::result::Result<(), SessionError>) {
        if let Err(error) = self.update(f) {
            warn!(%error, "unexpected session transition");
        }
    }

    fn id(&self) -> Uuid { lock(&self.session).id() }
}

struct Page {
    window: Arc<Window>,
    readiness: Arc<ReadinessMonitor>,
}

pub struct PaymentSessionInitiator {
    config: RedirectConfig,
    policy: GatewayPolicy,
    credentials: Box<dyn CredentialSource>,
    page: Option<Page>,
    processing: ProcessingFlag,
    in_flight: Arc<Mutex<Option<Uuid>>>,
    sessions: Mutex<VecDeque<Arc<SessionCell>>>,
    events: broadcast::Sender<SessionEvent>,
    stall_handler: Option<StallHandler>,
}

impl PaymentSessionInitiator {
    pub fn new(config: RedirectConfig, credentials: impl CredentialSource + 'static) -> Result<Self> {
        let policy = config.gateway_policy()?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            config,
            policy,
            credentials: Box::new(credentials),
            page: None,
            processing: ProcessingFlag::new(),
            in_flight: Arc::default(),
            sessions: Mutex::new(VecDeque::with_capacity(SESSION_HISTORY)),
            events,
            stall_handler: None,
        })
    }

    /// Binds the initiator to a page. Without one every session fails with
    /// [`RedirectError::NoBrowserContext`].
    pub fn attach(mut self, window: Arc<Window>, readiness: Arc<ReadinessMonitor>) -> Self {
        self.page = Some(Page { window, readiness });
        self
    }

    /// Called with the session id when the backstop fires before the widget
    /// redirected or reported a result.
    pub fn on_stall(mut self, handler: impl Fn(Uuid) + Send + Sync + 'static) -> Self {
        self.stall_handler = Some(Arc::new(handler));
        self
    }

    pub fn processing(&self) -> &ProcessingFlag { &self.processing }
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> { self.events.subscribe() }
    pub fn active_session(&self) -> Option<Uuid> { *lock(&self.in_flight) }

    pub fn session(&self, id: Uuid) -> Option<PaymentSession> {
        lock(&self.sessions).iter().find(|cell| cell.id() == id).map(|cell| lock(&cell.session).clone())
    }

    /// `true` once the widget has been handed the session. Every failure is
    /// logged and reported as `false`.
    pub fn initiate(&self, request: &PaymentSessionRequest) -> bool {
        match self.try_initiate(request) {
            Ok(session_id) => {
                info!(%session_id, order = request.order_reference(), "payment session handed to widget");
                true
            }
            Err(error @ RedirectError::Invocation(_)) => {
                error!(%error, order = request.order_reference(), "payment widget failed");
                false
            }
            Err(error) => {
                warn!(%error, order = request.order_reference(), "payment session not started");
                false
            }
        }
    }

    pub fn try_initiate(&self, request: &PaymentSessionRequest) -> Result<Uuid> {
        let Page { window, readiness } = self.page.as_ref().ok_or(RedirectError::NoBrowserContext)?;
        let runtime = Handle::try_current().map_err(|_| RedirectError::NoBrowserContext)?;
        let credentials = self.credentials.load()?;
        let state = readiness.state();
        if state != ScriptReadinessState::Ready {
            return Err(RedirectError::NotReady(state));
        }
        let entry_point = window.entry_point().ok_or(RedirectError::NotReady(state))?;
        let callback = CallbackUrl::from_origin(window.origin());
        let payload = serde_json::to_value(GlobalPaymentPayload::assemble(request, &credentials, &callback))?;

        let cell = {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.is_some() {
                return Err(RedirectError::SessionInFlight);
            }
            let cell = Arc::new(SessionCell {
                session: Mutex::new(PaymentSession::open(request.order_reference())),
                events: self.events.clone(),
            });
            cell.update(PaymentSession::preconditions_checked)?;
            *in_flight = Some(cell.id());
            cell
        };
        let session_id = cell.id();
        {
            // Only the newest entry can still be in flight.
            let mut sessions = lock(&self.sessions);
            if sessions.len() == SESSION_HISTORY {
                sessions.pop_front();
            }
            sessions.push_back(Arc::clone(&cell));
        }

        window.set_global(&self.config.payload_global, payload);
        self.processing.set(true);

        let redirected = Arc::clone(&cell);
        let redirector = GatewayRedirector::new(self.policy.clone(), window).on_redirect(Arc::new(move |target: &str| {
            redirected.update(|session| session.redirected(target));
        }));
        let teardown = OverrideRegistry::new(Arc::clone(window))
            .with_watch_window(self.config.watch_window)
            .install(Arc::new(redirector));
        let installed = teardown.installed();
        cell.transition(|session| session.overrides_installed(installed));

        let outcomes = self.watch_outcomes(window, &cell, &teardown);
        cell.transition(PaymentSession::widget_invoked);

        if let Err(widget_error) = entry_point() {
            self.processing.set(false);
            let restored = teardown.teardown();
            drop(outcomes);
            cell.update(|session| {
                session.abort(widget_error.to_string());
                session.restored(restored);
            });
            release(&self.in_flight, session_id);
            return Err(widget_error.into());
        }

        self.schedule_restoration(&runtime, cell, teardown, outcomes);
        Ok(session_id)
    }

    /// Session-internal listeners; a result ends the session and restores
    /// the page without waiting for the backstop.
    fn watch_outcomes(&self, window: &Arc<Window>, cell: &Arc<SessionCell>, teardown: &TeardownHandle) -> Subscription {
        let settle = {
            let (cell, teardown, in_flight) = (Arc::clone(cell), teardown.clone(), Arc::clone(&self.in_flight));
            Arc::new(move |result: PaymentResult| {
                if cell.update(|session| session.result_received(result)) {
                    let restored = teardown.teardown();
                    cell.update(|session| session.restored(restored));
                    release(&in_flight, cell.id());
                }
            })
        };
        let on_failure = Arc::clone(&settle);
        let processing = self.processing.clone();
        OutcomeBridge::from_config(Arc::clone(window), &self.config).subscribe(
            move |result| settle(result),
            move |result| on_failure(result),
            move |value| processing.set(value),
        )
    }

    fn schedule_restoration(&self, runtime: &Handle, cell: Arc<SessionCell>, teardown: TeardownHandle, outcomes: Subscription) {
        let delay = self.config.restore_delay;
        let in_flight = Arc::clone(&self.in_flight);
        let processing = self.processing.clone();
        let stall_handler = self.stall_handler.clone();
        let reset_on_stall = self.config.reset_processing_on_stall;
        runtime.spawn(async move {
            sleep(delay).await;
            let restored = teardown.teardown();
            drop(outcomes);
            let session_id = cell.id();
            if cell.update(|session| session.restored(restored)) {
                warn!(%session_id, "payment widget neither redirected nor reported a result");
                if let Some(handler) = &stall_handler {
                    handler(session_id);
                }
                if reset_on_stall {
                    processing.set(false);
                }
            }
            release(&in_flight, session_id);
        });
    }
}

fn release(in_flight: &Mutex<Option<Uuid>>, session_id: Uuid) {
    let mut active = lock(in_flight);
    if *active == Some(session_id) {
        *active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::WidgetError;
    use crate::domain::aggregates::SessionStatus;
    use crate::{Customer, PaymentCredentials};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GATEWAY: &str = "https://gateway.example/pay?x=1";
    const UNRELATED: &str = "https://unrelated.example/x";

    fn config() -> RedirectConfig {
        RedirectConfig { gateway_tokens: vec!["gateway".into()], ..RedirectConfig::default() }
    }

    fn credentials() -> PaymentCredentials {
        PaymentCredentials::from_parts(Some("app-1".into()), Some("hash-1".into()), Some("tok-1".into())).unwrap()
    }

    fn request() -> PaymentSessionRequest {
        let customer = Customer { first_name: "Nimal".into(), last_name: "Perera".into(), email: "nimal@example.com".into(), phone_number: "0771234567".into() };
        PaymentSessionRequest::new(Decimal::new(4999, 2), "LKR", "ORD-42", customer).unwrap()
    }

    /// A page whose widget opens `target` through `window.open`.
    async fn page_with_widget(target: &'static str) -> (Arc<Window>, Arc<ReadinessMonitor>) {
        let window = Window::new("https://shop.example");
        let page = Arc::downgrade(&window);
        window.register_entry_point(Arc::new(move || {
            if let Some(window) = page.upgrade() {
                window.open(target);
            }
            Ok::<(), WidgetError>(())
        }));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        (window, readiness)
    }

    fn initiator(window: &Arc<Window>, readiness: &Arc<ReadinessMonitor>) -> PaymentSessionInitiator {
        PaymentSessionInitiator::new(config(), credentials()).unwrap().attach(Arc::clone(window), Arc::clone(readiness))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_popup_becomes_full_navigation() {
        let (window, readiness) = page_with_widget(GATEWAY).await;
        let initiator = initiator(&window, &readiness);

        let session_id = initiator.try_initiate(&request()).unwrap();
        assert_eq!(window.navigations(), vec![GATEWAY.to_string()]);
        assert!(window.popups().is_empty());
        assert!(initiator.processing().is_processing());

        let payload = window.global("onePayData").unwrap();
        assert_eq!(payload["transactionRedirectUrl"], "https://shop.example/api/onepay/callback");
        assert_eq!(payload["orderReference"], "ORD-42");
        assert_eq!(payload["appToken"], "tok-1");

        let session = initiator.session(session_id).unwrap();
        assert_eq!(session.status(), SessionStatus::Redirected);
        assert_eq!(session.installed(), 3);
        assert_eq!(initiator.active_session(), Some(session_id));

        sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        let session = initiator.session(session_id).unwrap();
        assert_eq!(session.status(), SessionStatus::Redirected);
        assert_eq!(session.restored_count(), Some(session.installed()));
        assert!(initiator.active_session().is_none());
        assert_eq!(window.open(GATEWAY).map(|p| p.url), Some(GATEWAY.to_string()));
        assert_eq!(window.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iframe_from_widget_behaves_normally_after_backstop() {
        let window = Window::new("https://shop.example");
        let created: Arc<Mutex<Option<crate::browser::Element>>> = Arc::default();
        let (page, slot) = (Arc::downgrade(&window), Arc::clone(&created));
        window.register_entry_point(Arc::new(move || {
            if let Some(window) = page.upgrade() {
                *slot.lock().unwrap() = Some(window.document().create_element("iframe"));
            }
            Ok::<(), WidgetError>(())
        }));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let initiator = initiator(&window, &readiness);

        initiator.try_initiate(&request()).unwrap();
        sleep(Duration::from_secs(11)).await;

        let frame = created.lock().unwrap().take().unwrap();
        frame.set_src(GATEWAY);
        assert_eq!(frame.src().as_deref(), Some(GATEWAY));
        assert!(window.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_history_is_bounded() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let initiator = initiator(&window, &readiness);

        let mut ids = Vec::new();
        for n in 0..SESSION_HISTORY + 2 {
            ids.push(initiator.try_initiate(&request()).unwrap());
            window.dispatch_event("onePayFail", &json!({"code": "400", "transaction_id": format!("t-{n}"), "status": "FAIL"}));
        }

        assert!(initiator.session(ids[0]).is_none());
        assert!(initiator.session(ids[1]).is_none());
        assert!(initiator.session(ids[2]).is_some());
        let last = initiator.session(ids[SESSION_HISTORY + 1]).unwrap();
        assert_eq!(last.status(), SessionStatus::ResultReceived);
        assert_eq!(lock(&initiator.sessions).len(), SESSION_HISTORY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_popup_keeps_original_behaviour() {
        let (window, readiness) = page_with_widget(UNRELATED).await;
        let initiator = initiator(&window, &readiness);

        assert!(initiator.initiate(&request()));
        assert!(window.navigations().is_empty());
        assert_eq!(window.popups().into_iter().map(|p| p.url).collect::<Vec<_>>(), vec![UNRELATED.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_leave_page_untouched() {
        let (window, readiness) = page_with_widget(GATEWAY).await;
        let missing = PaymentSessionInitiator::new(config(), MissingCredentials).unwrap().attach(Arc::clone(&window), readiness);

        assert!(!missing.initiate(&request()));
        assert!(matches!(missing.try_initiate(&request()), Err(RedirectError::MissingCredential(_))));
        assert!(window.global("onePayData").is_none());
        assert!(!missing.processing().is_processing());
        assert!(window.navigations().is_empty());
        assert_eq!(window.document().observer_count(), 0);
    }

    struct MissingCredentials;

    impl CredentialSource for MissingCredentials {
        fn load(&self) -> Result<PaymentCredentials> {
            PaymentCredentials::from_parts(Some("app".into()), None, Some("tok".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_leaves_page_untouched() {
        let window = Window::new("https://shop.example");
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let initiator = initiator(&window, &readiness);

        assert!(matches!(initiator.try_initiate(&request()), Err(RedirectError::NotReady(ScriptReadinessState::Pending))));
        assert!(window.global("onePayData").is_none());
        assert!(!initiator.processing().is_processing());
        assert!(window.open(GATEWAY).is_some());
    }

    #[tokio::test]
    async fn test_no_page_is_a_precondition_failure() {
        let initiator = PaymentSessionInitiator::new(config(), credentials()).unwrap();
        assert!(matches!(initiator.try_initiate(&request()), Err(RedirectError::NoBrowserContext)));
        assert!(!initiator.initiate(&request()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throwing_widget_restores_immediately() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Err(WidgetError("onePay is not defined".into()))));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let initiator = initiator(&window, &readiness);
        let mut events = initiator.events();

        assert!(matches!(initiator.try_initiate(&request()), Err(RedirectError::Invocation(_))));
        assert!(!initiator.processing().is_processing());
        assert!(initiator.active_session().is_none());
        assert_eq!(window.document().observer_count(), 0);
        assert_eq!(window.listener_count("onePaySuccess"), 0);
        assert_eq!(window.open(GATEWAY).map(|p| p.url), Some(GATEWAY.to_string()));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| matches!(e, SessionEvent::Aborted { .. })));
        assert!(matches!(seen.last(), Some(SessionEvent::Restored { restored: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backstop_restores_stalled_session() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let stalls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stalls);
        let initiator = initiator(&window, &readiness).on_stall(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let session_id = initiator.try_initiate(&request()).unwrap();
        assert!(matches!(initiator.try_initiate(&request()), Err(RedirectError::SessionInFlight)));

        sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        let session = initiator.session(session_id).unwrap();
        assert_eq!(session.status(), SessionStatus::TimedOutRestored);
        assert_eq!(session.restored_count(), Some(3));
        assert_eq!(stalls.load(Ordering::SeqCst), 1);
        // Processing stays set unless configured otherwise.
        assert!(initiator.processing().is_processing());
        assert!(initiator.active_session().is_none());
        assert!(window.open(GATEWAY).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_can_reset_processing() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let config = RedirectConfig { reset_processing_on_stall: true, restore_delay: Duration::from_secs(2), ..config() };
        let initiator = PaymentSessionInitiator::new(config, credentials()).unwrap().attach(Arc::clone(&window), readiness);

        assert!(initiator.initiate(&request()));
        sleep(Duration::from_millis(2001)).await;
        assert!(!initiator.processing().is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_signal_ends_session_early() {
        let window = Window::new("https://shop.example");
        window.register_entry_point(Arc::new(|| Ok::<(), WidgetError>(())));
        let readiness = Arc::new(ReadinessMonitor::new(Arc::clone(&window)));
        readiness.await_readiness(Duration::from_millis(10), Duration::from_secs(1)).await;
        let initiator = initiator(&window, &readiness);

        let delivered: Arc<Mutex<Vec<PaymentResult>>> = Arc::default();
        let sink = Arc::clone(&delivered);
        let processing = initiator.processing().clone();
        let _subscription = OutcomeBridge::new(Arc::clone(&window)).subscribe(
            move |result| sink.lock().unwrap().push(result),
            |_| {},
            move |value| processing.set(value),
        );

        let session_id = initiator.try_initiate(&request()).unwrap();
        window.dispatch_event("onePaySuccess", &json!({"code": "201", "transaction_id": "abc", "status": "SUCCESS"}));

        assert!(!initiator.processing().is_processing());
        assert_eq!(*delivered.lock().unwrap(), vec![PaymentResult::new("abc", true)]);
        let session = initiator.session(session_id).unwrap();
        assert_eq!(session.status(), SessionStatus::ResultReceived);
        assert_eq!(session.restored_count(), Some(3));
        assert!(initiator.active_session().is_none());

        sleep(Duration::from_secs(11)).await;
        assert_eq!(initiator.session(session_id).unwrap().restored_count(), Some(3));
        assert_eq!(window.listener_count("onePaySuccess"), 1);
    }
}
