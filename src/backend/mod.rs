//! Backend link: wire codec, socket lifecycle, request correlation and
//! subscription aggregation.
//!
//! Nothing in this module knows about HTTP or plugins; the
//! [`crate::service::Gateway`] ties these pieces together.

pub mod codec;
pub mod connection;
pub mod request;
pub mod subscription;

pub use codec::{InboundMessage, OutboundRequest};
pub use connection::{BackendConnection, ConnectionEvent};
pub use request::{PendingResponse, RequestRegistry, TrackedRequest};
pub use subscription::{FieldSelection, SubscriptionTable};
