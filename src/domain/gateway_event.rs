//! Lifecycle and data events published on the [`super::EventBus`].
//!
//! Every backend lifecycle transition and every forwarded notification
//! emits a [`GatewayEvent`]. Events are dispatched to named handlers
//! registered by plugins and broadcast to WebSocket clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Event name emitted once the backend reports ready.
pub const KLIPPY_READY: &str = "server:klippy_ready";
/// Event name emitted when the backend connection is lost.
pub const KLIPPY_DISCONNECT: &str = "server:klippy_disconnect";
/// Event name emitted when the backend reports a shutdown state.
pub const KLIPPY_SHUTDOWN: &str = "server:klippy_shutdown";
/// Event name emitted for every subscribed status update.
pub const STATUS_UPDATE: &str = "server:status_update";
/// Event name emitted for every line of g-code output.
pub const GCODE_RESPONSE: &str = "server:gcode_response";

/// Event emitted by the gateway core or by a plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The backend is connected and reported the `ready` state.
    KlippyReady {
        /// Time the readiness was observed.
        timestamp: DateTime<Utc>,
    },

    /// The backend connection was closed.
    KlippyDisconnected {
        /// Time the closure was processed.
        timestamp: DateTime<Utc>,
    },

    /// The backend reported `shutdown` through its webhooks state.
    KlippyShutdown {
        /// Time the shutdown was observed.
        timestamp: DateTime<Utc>,
    },

    /// Status data for the aggregated subscription.
    ///
    /// Every subscriber receives the full union of subscribed objects.
    StatusUpdate {
        /// Backend event time reported alongside the status.
        eventtime: Option<f64>,
        /// Object name to field values.
        status: Map<String, Value>,
        /// Time the update was received.
        timestamp: DateTime<Utc>,
    },

    /// One chunk of raw g-code output from the backend.
    GcodeResponse {
        /// Raw text as sent by the backend.
        response: String,
        /// Time the output was received.
        timestamp: DateTime<Utc>,
    },

    /// Plugin-defined event.
    Custom {
        /// Event name handlers register under.
        name: String,
        /// Arbitrary payload.
        payload: Value,
        /// Time the event was emitted.
        timestamp: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// Builds a [`GatewayEvent::KlippyReady`] stamped now.
    #[must_use]
    pub fn klippy_ready() -> Self {
        Self::KlippyReady {
            timestamp: Utc::now(),
        }
    }

    /// Builds a [`GatewayEvent::KlippyDisconnected`] stamped now.
    #[must_use]
    pub fn klippy_disconnected() -> Self {
        Self::KlippyDisconnected {
            timestamp: Utc::now(),
        }
    }

    /// Builds a [`GatewayEvent::KlippyShutdown`] stamped now.
    #[must_use]
    pub fn klippy_shutdown() -> Self {
        Self::KlippyShutdown {
            timestamp: Utc::now(),
        }
    }

    /// Returns the bus name handlers register under for this event.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::KlippyReady { .. } => KLIPPY_READY,
            Self::KlippyDisconnected { .. } => KLIPPY_DISCONNECT,
            Self::KlippyShutdown { .. } => KLIPPY_SHUTDOWN,
            Self::StatusUpdate { .. } => STATUS_UPDATE,
            Self::GcodeResponse { .. } => GCODE_RESPONSE,
            Self::Custom { name, .. } => name,
        }
    }

    /// Returns the time the event was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::KlippyReady { timestamp }
            | Self::KlippyDisconnected { timestamp }
            | Self::KlippyShutdown { timestamp }
            | Self::StatusUpdate { timestamp, .. }
            | Self::GcodeResponse { timestamp, .. }
            | Self::Custom { timestamp, .. } => *timestamp,
        }
    }
}
