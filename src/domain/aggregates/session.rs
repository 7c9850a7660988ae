//! Payment Session Aggregate
//!
//! One attempt from `initiate()` to its terminal state. Redirect, result and
//! backstop restoration all end with the overrides restored; the terminal
//! status only records how the attempt concluded.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::events::SessionEvent;
use crate::PaymentResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    PreconditionsChecked,
    OverridesInstalled,
    WidgetInvoked,
    Redirected,
    ResultReceived,
    TimedOutRestored,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Redirected | Self::ResultReceived | Self::TimedOutRestored | Self::Aborted)
    }
}

#[derive(Clone, Debug)]
pub struct PaymentSession {
    id: Uuid,
    order_reference: String,
    status: SessionStatus,
    installed: usize,
    restored: Option<usize>,
    redirect_target: Option<String>,
    result: Option<PaymentResult>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<SessionEvent>,
}

impl PaymentSession {
    pub fn open(order_reference: impl Into<String>) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut session = Self {
            id, order_reference: order_reference.into(), status: SessionStatus::Idle,
            installed: 0, restored: None, redirect_target: None, result: None,
            created_at: now, updated_at: now, events: vec![],
        };
        session.raise_event(SessionEvent::Started { session_id: id, order_reference: session.order_reference.clone() });
        session
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_reference(&self) -> &str { &self.order_reference }
    pub fn status(&self) -> SessionStatus { self.status }
    pub fn installed(&self) -> usize { self.installed }
    pub fn restored_count(&self) -> Option<usize> { self.restored }
    pub fn is_restored(&self) -> bool { self.restored.is_some() }
    pub fn redirect_target(&self) -> Option<&str> { self.redirect_target.as_deref() }
    pub fn result(&self) -> Option<&PaymentResult> { self.result.as_ref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn preconditions_checked(&mut self) -> Result<(), SessionError> {
        self.advance(SessionStatus::Idle, SessionStatus::PreconditionsChecked)
    }

    pub fn overrides_installed(&mut self, count: usize) -> Result<(), SessionError> {
        self.advance(SessionStatus::PreconditionsChecked, SessionStatus::OverridesInstalled)?;
        self.installed = count;
        self.raise_event(SessionEvent::OverridesInstalled { session_id: self.id, count });
        Ok(())
    }

    /// Marked before the entry point runs, since the widget may redirect
    /// synchronously from inside the call.
    pub fn widget_invoked(&mut self) -> Result<(), SessionError> {
        self.advance(SessionStatus::OverridesInstalled, SessionStatus::WidgetInvoked)?;
        self.raise_event(SessionEvent::WidgetInvoked { session_id: self.id });
        Ok(())
    }

    /// First terminal outcome wins; returns whether this one was recorded.
    pub fn redirected(&mut self, target: &str) -> bool {
        if self.status != SessionStatus::WidgetInvoked { return false; }
        self.status = SessionStatus::Redirected;
        self.redirect_target = Some(target.to_string());
        self.touch();
        self.raise_event(SessionEvent::Redirected { session_id: self.id, target: target.to_string() });
        true
    }

    pub fn result_received(&mut self, result: PaymentResult) -> bool {
        if self.status != SessionStatus::WidgetInvoked { return false; }
        self.status = SessionStatus::ResultReceived;
        self.result = Some(result.clone());
        self.touch();
        self.raise_event(SessionEvent::ResultReceived { session_id: self.id, result });
        true
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.status.is_terminal() { return; }
        self.status = SessionStatus::Aborted;
        self.touch();
        self.raise_event(SessionEvent::Aborted { session_id: self.id, reason: reason.into() });
    }

    /// Records restoration of the overrides. Returns `true` when the session
    /// was still waiting on the widget, i.e. the widget stalled.
    pub fn restored(&mut self, count: usize) -> bool {
        if self.restored.is_some() { return false; }
        self.restored = Some(count);
        let stalled = self.status == SessionStatus::WidgetInvoked;
        if stalled {
            self.status = SessionStatus::TimedOutRestored;
            self.raise_event(SessionEvent::Stalled { session_id: self.id });
        }
        self.touch();
        self.raise_event(SessionEvent::Restored { session_id: self.id, restored: count });
        stalled
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> { std::mem::take(&mut self.events) }

    fn advance(&mut self, from: SessionStatus, to: SessionStatus) -> Result<(), SessionError> {
        if self.status != from { return Err(SessionError::InvalidTransition { from: self.status, to }); }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn raise_event(&mut self, e: SessionEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum SessionError { InvalidTransition { from: SessionStatus, to: SessionStatus } }
impl std::error::Error for SessionError {}
impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::InvalidTransition { from, to } => write!(f, "cannot move from {from:?} to {to:?}") }
    }
}
