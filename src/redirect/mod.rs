//! Redirect enforcement around the OnePay widget.
//!
//! [`PaymentSessionInitiator`] is the entry point; the other components are
//! usable on their own for pages that drive the widget differently.

pub mod initiator;
pub mod interception;
pub mod outcome;
pub mod readiness;
pub mod registry;
mod watcher;

pub use initiator::{PaymentSessionInitiator, StallHandler};
pub use interception::{default_adapters, GatewayRedirector, NavigationInterceptionPort, PrimitiveAdapter};
pub use outcome::{OutcomeBridge, ProcessingFlag, Subscription};
pub use readiness::{ReadinessMonitor, ScriptReadinessState};
pub use registry::{OverrideRecord, OverrideRegistry, PrimitiveTarget, TeardownHandle};
