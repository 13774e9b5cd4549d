//! Domain layer: identifiers, connection state, events and registries.
//!
//! This module contains the server-side domain model: the request
//! identity used on the wire, the connection state machine and readiness
//! checklist, the event bus used to fan out backend lifecycle and data
//! events, and the registry of remote endpoints advertised by the backend.

pub mod endpoint_registry;
pub mod event_bus;
pub mod gateway_event;
pub mod request_id;
pub mod state;

pub use endpoint_registry::EndpointRegistry;
pub use event_bus::EventBus;
pub use gateway_event::GatewayEvent;
pub use request_id::RequestId;
pub use state::{ConnectionState, GatewayStatus, Milestone, ReadinessChecklist};
