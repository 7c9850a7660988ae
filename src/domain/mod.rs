//! Checkout domain: value objects, session events and the session aggregate.
pub mod aggregates;
pub mod events;
pub mod value_objects;
