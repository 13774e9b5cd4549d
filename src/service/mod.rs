//! Service layer: the gateway core and its startup handshake.
//!
//! [`Gateway`] owns the backend connection, correlates requests, dispatches
//! notifications and publishes lifecycle events through the
//! [`super::domain::EventBus`]. The readiness handshake runs once per
//! connection.

pub mod gateway;
pub mod klippy_apis;
pub mod readiness;

pub use gateway::{Gateway, RemoteMethod};
