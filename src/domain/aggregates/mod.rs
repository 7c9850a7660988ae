//! Aggregates module
pub mod session;

pub use session::{PaymentSession, SessionError, SessionStatus};
