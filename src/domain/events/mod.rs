//! Session lifecycle events
use crate::PaymentResult;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started { session_id: Uuid, order_reference: String },
    OverridesInstalled { session_id: Uuid, count: usize },
    WidgetInvoked { session_id: Uuid },
    Redirected { session_id: Uuid, target: String },
    ResultReceived { session_id: Uuid, result: PaymentResult },
    Aborted { session_id: Uuid, reason: String },
    Stalled { session_id: Uuid },
    Restored { session_id: Uuid, restored: usize },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::Started { session_id, .. }
            | Self::OverridesInstalled { session_id, .. }
            | Self::WidgetInvoked { session_id }
            | Self::Redirected { session_id, .. }
            | Self::ResultReceived { session_id, .. }
            | Self::Aborted { session_id, .. }
            | Self::Stalled { session_id }
            | Self::Restored { session_id, .. } => *session_id,
        }
    }
}
