//! Connection state machine and readiness checklist.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

/// Lifecycle of the backend connection as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket is open.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Socket open; readiness handshake still running.
    ConnectedAwaitingReady,
    /// The backend reported `ready`.
    Ready,
}

impl ConnectionState {
    /// Returns `true` while a socket is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedAwaitingReady | Self::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ConnectedAwaitingReady => "connected_awaiting_ready",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// One-time step of the post-connect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// The backend answered `info` with `state == "ready"`.
    KlippyReady,
    /// The `webhooks` object subscription succeeded.
    WebhooksSubscribed,
    /// The g-code output subscription succeeded.
    GcodeOutputSubscribed,
    /// Remote endpoints were registered with the front-end.
    EndpointsRegistered,
}

impl Milestone {
    /// Milestones that must all be present before polling stops.
    pub const REQUIRED: [Self; 3] = [
        Self::KlippyReady,
        Self::WebhooksSubscribed,
        Self::GcodeOutputSubscribed,
    ];
}

/// Milestones reached during the current connection epoch.
///
/// Only ever grows while connected; cleared on disconnection.
#[derive(Debug, Clone, Default)]
pub struct ReadinessChecklist {
    reached: BTreeSet<Milestone>,
}

impl ReadinessChecklist {
    /// Creates an empty checklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a milestone. Returns `true` if it was not yet present.
    pub fn mark(&mut self, milestone: Milestone) -> bool {
        self.reached.insert(milestone)
    }

    /// Returns `true` if the milestone has been reached.
    #[must_use]
    pub fn contains(&self, milestone: Milestone) -> bool {
        self.reached.contains(&milestone)
    }

    /// Returns `true` once every required milestone is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        Milestone::REQUIRED.iter().all(|m| self.reached.contains(m))
    }

    /// Returns `true` if nothing has been reached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    /// Returns the reached milestones in a stable order.
    #[must_use]
    pub fn milestones(&self) -> Vec<Milestone> {
        self.reached.iter().copied().collect()
    }

    /// Forgets every milestone, starting a new epoch.
    pub fn clear(&mut self) {
        self.reached.clear();
    }
}

/// Mutable gateway status shared between the supervisor, the readiness
/// task and the notification handlers.
#[derive(Debug, Clone, Default)]
pub struct GatewayStatus {
    /// Current connection state.
    pub connection: ConnectionState,
    /// Last state string reported by the backend (`ready`, `startup`,
    /// `shutdown`, `error`, ...).
    pub klippy_state: Option<String>,
    /// Milestones of the current epoch.
    pub checklist: ReadinessChecklist,
}

impl GatewayStatus {
    /// Resets everything tied to a connection epoch.
    pub fn reset(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.klippy_state = None;
        self.checklist.clear();
    }
}
