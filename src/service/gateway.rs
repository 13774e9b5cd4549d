//! Gateway core: request entry point, notification dispatch and the
//! connection supervisor.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::readiness;
use crate::backend::subscription::{STATUS_UPDATE_METHOD, SUBSCRIBE_METHOD};
use crate::backend::{
    BackendConnection, ConnectionEvent, InboundMessage, PendingResponse, RequestRegistry,
    SubscriptionTable,
};
use crate::config::GatewayConfig;
use crate::domain::{
    ConnectionState, EndpointRegistry, EventBus, GatewayEvent, GatewayStatus, Milestone,
};
use crate::error::GatewayError;
use crate::plugins::{FileManager, Plugin, PluginRegistry, TemperatureStore, temperature_store};
use crate::sync;

/// Notification carrying g-code output.
pub const GCODE_RESPONSE_METHOD: &str = "process_gcode_response";

/// Callback invoked with the params of a backend notification.
pub type RemoteMethod = Arc<dyn Fn(Map<String, Value>) + Send + Sync>;

/// Owns the backend link and every registry tied to it.
///
/// Front-end handlers and plugins talk to the backend exclusively through
/// [`Gateway::make_request`]. [`Gateway::run`] keeps the connection alive
/// for the lifetime of the process.
pub struct Gateway {
    config: GatewayConfig,
    connection: BackendConnection,
    requests: RequestRegistry,
    subscriptions: Mutex<SubscriptionTable>,
    remote_methods: RwLock<HashMap<String, RemoteMethod>>,
    status: Arc<Mutex<GatewayStatus>>,
    event_bus: EventBus,
    endpoints: EndpointRegistry,
    plugins: PluginRegistry,
    file_manager: Arc<FileManager>,
    temperature_store: Arc<TemperatureStore>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<String> = sync::read(&self.remote_methods).keys().cloned().collect();
        methods.sort_unstable();
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("requests", &self.requests)
            .field("status", &*sync::lock(&self.status))
            .field("remote_methods", &methods)
            .field("endpoints", &self.endpoints)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Builds a disconnected gateway with the built-in remote methods and
    /// the core plugins (file manager, temperature store) registered.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let event_bus = EventBus::new(config.event_bus_capacity);
            let status = Arc::new(Mutex::new(GatewayStatus::default()));
            let plugins = PluginRegistry::new();
            let file_manager = Arc::new(FileManager::new());
            plugins.load(Arc::clone(&file_manager) as Arc<dyn Plugin>);
            let temperature_store =
                Arc::new(TemperatureStore::new(config.temperature_sample_interval));
            plugins.load(Arc::clone(&temperature_store) as Arc<dyn Plugin>);
            temperature_store::register_handlers(&temperature_store, &event_bus, weak.clone());

            let gateway = Self {
                requests: RequestRegistry::new(config.request_log_interval),
                config,
                connection: BackendConnection::new(),
                subscriptions: Mutex::new(SubscriptionTable::new()),
                remote_methods: RwLock::new(HashMap::new()),
                status: Arc::clone(&status),
                event_bus: event_bus.clone(),
                endpoints: EndpointRegistry::new(),
                plugins,
                file_manager,
                temperature_store,
            };

            let bus = event_bus.clone();
            gateway.register_remote_method(GCODE_RESPONSE_METHOD, move |params| {
                let response = match params.get("response") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                bus.send_event(GatewayEvent::GcodeResponse {
                    response,
                    timestamp: Utc::now(),
                });
            });
            gateway.register_remote_method(STATUS_UPDATE_METHOD, move |params| {
                process_status_update(&event_bus, &status, params);
            });
            gateway
        })
    }

    /// Returns the configuration the gateway was built with.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the event bus shared with plugins and WebSocket clients.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns the remote endpoints advertised by the backend.
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// Returns the loaded plugins.
    #[must_use]
    pub const fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Returns the core file manager.
    #[must_use]
    pub const fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Returns the heater temperature history.
    #[must_use]
    pub const fn temperature_store(&self) -> &Arc<TemperatureStore> {
        &self.temperature_store
    }

    /// Returns the backend connection handle.
    #[must_use]
    pub const fn connection(&self) -> &BackendConnection {
        &self.connection
    }

    /// Returns a snapshot of the connection state and checklist.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        sync::lock(&self.status).clone()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        sync::lock(&self.status).connection
    }

    /// Returns the number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Returns a copy of the aggregated subscription table.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionTable {
        sync::lock(&self.subscriptions).clone()
    }

    /// Registers a handler for backend notifications named `name`.
    ///
    /// Registering a name twice keeps the first handler and logs; returns
    /// `false` in that case.
    pub fn register_remote_method<F>(&self, name: &str, callback: F) -> bool
    where
        F: Fn(Map<String, Value>) + Send + Sync + 'static,
    {
        let mut methods = sync::write(&self.remote_methods);
        if methods.contains_key(name) {
            tracing::warn!(method = name, "remote method already registered");
            return false;
        }
        methods.insert(name.to_string(), Arc::new(callback));
        true
    }

    /// Sends `method` to the backend and waits for its response.
    ///
    /// Subscribe requests are rewritten to carry the aggregated
    /// subscription table first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] when the backend is not
    /// connected or disconnects before answering, and
    /// [`GatewayError::BadRequest`] when the backend answers with an error.
    pub async fn make_request(
        &self,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Value, GatewayError> {
        self.issue(method, params)?.wait().await
    }

    /// Sends `method` without waiting for the response.
    ///
    /// For subscribe requests the merge, registration and write happen
    /// under the subscription lock, so concurrent subscribers cannot lose
    /// each other's objects.
    ///
    /// # Errors
    ///
    /// See [`Gateway::make_request`].
    pub fn issue(
        &self,
        method: &str,
        mut params: Map<String, Value>,
    ) -> Result<PendingResponse, GatewayError> {
        if method != SUBSCRIBE_METHOD {
            return self.requests.issue(&self.connection, method, params);
        }

        let mut subscriptions = sync::lock(&self.subscriptions);
        if !self.connection.is_connected() {
            return Err(GatewayError::not_connected());
        }
        subscriptions.rewrite_request(&mut params);
        self.requests.issue(&self.connection, method, params)
    }

    /// Routes one decoded frame: notifications go to the remote method
    /// table, responses to the request registry.
    pub fn process_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::Notification { method, params } => {
                let callback = sync::read(&self.remote_methods).get(&method).cloned();
                match callback {
                    Some(callback) => callback(params),
                    None => tracing::info!(method = %method, "unknown method received"),
                }
            }
            InboundMessage::Response { id, outcome } => {
                self.requests.resolve(id, outcome);
            }
        }
    }

    /// Keeps the backend connected forever.
    ///
    /// Connection attempts are made every reconnect delay until one
    /// succeeds; each connection is then served until it closes, after
    /// which the cycle starts over.
    pub async fn run(self: Arc<Self>) {
        let address = self.config.klippy_address.clone();
        tracing::info!(address = %address.display(), "connecting to klippy");
        let mut attempts: u64 = 0;
        loop {
            self.set_connection_state(ConnectionState::Connecting);
            match self.connection.connect(&address).await {
                Ok(events) => {
                    attempts = 0;
                    self.run_session(events).await;
                }
                Err(err) => {
                    attempts += 1;
                    self.set_connection_state(ConnectionState::Disconnected);
                    if attempts == 1 {
                        tracing::info!(error = %err, "klippy not available; retrying");
                    } else {
                        tracing::debug!(error = %err, attempts, "klippy connection attempt failed");
                    }
                }
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Serves one connection epoch: runs the readiness handshake and
    /// dispatches inbound frames until the connection closes, then cleans
    /// up.
    pub async fn run_session(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        {
            let mut status = sync::lock(&self.status);
            status.checklist.clear();
            status.connection = ConnectionState::ConnectedAwaitingReady;
        }

        // Dropping the set aborts the handshake if this future is cancelled.
        let mut handshake = JoinSet::new();
        handshake.spawn(readiness::run(Arc::clone(self)));

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Message(message) => self.process_message(message),
                ConnectionEvent::Closed => break,
            }
        }

        // The handshake may be between a resolved request and its
        // milestone on another worker; it must finish before the reset.
        handshake.shutdown().await;
        self.on_connection_closed();
    }

    /// Ends the current connection epoch.
    ///
    /// Every pending request fails with "Klippy Disconnected", the
    /// subscription table and checklist are cleared, and
    /// `server:klippy_disconnect` is published.
    pub(crate) fn on_connection_closed(&self) {
        self.connection.close();
        sync::lock(&self.status).reset();
        sync::lock(&self.subscriptions).clear();
        let failed = self.requests.fail_all(&GatewayError::disconnected());
        tracing::info!(failed_requests = failed, "klippy connection removed");
        self.event_bus.send_event(GatewayEvent::klippy_disconnected());
    }

    /// Returns `true` if `milestone` was reached this epoch.
    #[must_use]
    pub fn has_milestone(&self, milestone: Milestone) -> bool {
        sync::lock(&self.status).checklist.contains(milestone)
    }

    /// Records a milestone. Returns `true` if it is new.
    pub fn mark_milestone(&self, milestone: Milestone) -> bool {
        sync::lock(&self.status).checklist.mark(milestone)
    }

    /// Returns `true` once every required milestone is present.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        sync::lock(&self.status).checklist.is_complete()
    }

    /// Records that the backend reported ready. Returns `true` the first
    /// time in an epoch.
    pub(crate) fn mark_ready(&self) -> bool {
        let mut status = sync::lock(&self.status);
        status.connection = ConnectionState::Ready;
        status.klippy_state = Some("ready".to_string());
        status.checklist.mark(Milestone::KlippyReady)
    }

    fn set_connection_state(&self, state: ConnectionState) {
        sync::lock(&self.status).connection = state;
    }

    /// Shuts down opt-in plugins and closes the backend socket.
    ///
    /// Abort the [`Gateway::run`] task first, or it will reconnect.
    pub async fn shutdown(&self) {
        let count = self.plugins.shutdown_all().await;
        tracing::info!(plugins = count, "plugins shut down");
        self.connection.close();
    }
}

/// Built-in `process_status_update` handler.
fn process_status_update(
    event_bus: &EventBus,
    status: &Mutex<GatewayStatus>,
    mut params: Map<String, Value>,
) {
    let eventtime = params.get("eventtime").and_then(Value::as_f64);
    let update = match params.remove("status") {
        Some(Value::Object(update)) => update,
        _ => Map::new(),
    };

    let state = update
        .get("webhooks")
        .and_then(|webhooks| webhooks.get("state"))
        .and_then(Value::as_str);
    if let Some(state) = state {
        if state == "shutdown" {
            tracing::info!("klippy has shutdown");
            event_bus.send_event(GatewayEvent::klippy_shutdown());
        }
        sync::lock(status).klippy_state = Some(state.to_string());
    }

    event_bus.send_event(GatewayEvent::StatusUpdate {
        eventtime,
        status: update,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    use super::*;
    use crate::domain::gateway_event::KLIPPY_DISCONNECT;

    fn params(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        map
    }

    async fn next_event(
        rx: &mut tokio::sync::broadcast::Receiver<GatewayEvent>,
    ) -> GatewayEvent {
        let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await else {
            panic!("no event published");
        };
        event
    }

    /// Answers the handshake as a host that is still starting, then hangs
    /// up right after acknowledging the first subscribe.
    async fn answer_then_hang_up_after_subscribe(remote: DuplexStream) {
        let (reader, mut writer) = tokio::io::split(remote);
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(0x03, &mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let frame = buf.strip_suffix(&[0x03]).unwrap_or(&buf);
            let Ok(request) = serde_json::from_slice::<Value>(frame) else {
                panic!("gateway sent an invalid frame");
            };
            let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
            let result = match method {
                "info" => json!({"state": "startup", "state_message": "Klippy starting"}),
                "list_endpoints" => json!({"endpoints": []}),
                _ => json!({}),
            };
            let Ok(mut reply) = serde_json::to_vec(&json!({"id": request.get("id"), "result": result}))
            else {
                panic!("reply should encode");
            };
            reply.push(0x03);
            if writer.write_all(&reply).await.is_err() || method == SUBSCRIBE_METHOD {
                return;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handshake_progress_does_not_outlive_its_connection() {
        for _ in 0..100 {
            let gateway = Gateway::new(GatewayConfig::default());
            let (local, remote) = duplex(64 * 1024);
            let events = gateway.connection().attach(local);
            let host = tokio::spawn(answer_then_hang_up_after_subscribe(remote));

            let Ok(()) = tokio::time::timeout(Duration::from_secs(5), gateway.run_session(events)).await
            else {
                panic!("session did not end after the host hung up");
            };
            assert!(gateway.status().checklist.is_empty());
            assert!(!gateway.has_milestone(Milestone::WebhooksSubscribed));
            let _ = host.await;
        }
    }

    #[tokio::test]
    async fn new_session_starts_with_an_empty_checklist() {
        let gateway = Gateway::new(GatewayConfig::default());
        gateway.mark_milestone(Milestone::WebhooksSubscribed);
        let (local, remote) = duplex(1024);
        let events = gateway.connection().attach(local);

        let session = tokio::spawn({
            let gateway = Arc::clone(&gateway);
            async move { gateway.run_session(events).await }
        });
        for _ in 0..100 {
            if gateway.connection_state() == ConnectionState::ConnectedAwaitingReady {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.connection_state(), ConnectionState::ConnectedAwaitingReady);
        assert!(!gateway.has_milestone(Milestone::WebhooksSubscribed));

        drop(remote);
        let Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(5), session).await else {
            panic!("session did not end");
        };
    }

    #[tokio::test]
    async fn duplicate_remote_method_is_ignored() {
        let gateway = Gateway::new(GatewayConfig::default());
        assert!(!gateway.register_remote_method(GCODE_RESPONSE_METHOD, |_| {}));
        assert!(gateway.register_remote_method("set_device_power", |_| {}));
        assert!(!gateway.register_remote_method("set_device_power", |_| {}));
    }

    #[tokio::test]
    async fn gcode_output_is_republished() {
        let gateway = Gateway::new(GatewayConfig::default());
        let mut rx = gateway.event_bus().subscribe();
        gateway.process_message(InboundMessage::Notification {
            method: GCODE_RESPONSE_METHOD.to_string(),
            params: params(json!({"response": "// Klipper state: Ready"})),
        });
        let GatewayEvent::GcodeResponse { response, .. } = next_event(&mut rx).await else {
            panic!("expected gcode response");
        };
        assert_eq!(response, "// Klipper state: Ready");
    }

    #[tokio::test]
    async fn shutdown_state_emits_shutdown_then_status() {
        let gateway = Gateway::new(GatewayConfig::default());
        let mut rx = gateway.event_bus().subscribe();
        gateway.process_message(InboundMessage::Notification {
            method: STATUS_UPDATE_METHOD.to_string(),
            params: params(json!({
                "eventtime": 12.5,
                "status": {"webhooks": {"state": "shutdown", "state_message": "MCU error"}}
            })),
        });

        assert!(matches!(next_event(&mut rx).await, GatewayEvent::KlippyShutdown { .. }));
        let GatewayEvent::StatusUpdate { eventtime, status, .. } = next_event(&mut rx).await else {
            panic!("expected status update");
        };
        assert_eq!(eventtime, Some(12.5));
        assert!(status.contains_key("webhooks"));
        assert_eq!(gateway.status().klippy_state.as_deref(), Some("shutdown"));
    }

    #[tokio::test]
    async fn unknown_notifications_are_ignored() {
        let gateway = Gateway::new(GatewayConfig::default());
        let mut rx = gateway.event_bus().subscribe();
        gateway.process_message(InboundMessage::Notification {
            method: "no_such_method".to_string(),
            params: Map::new(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_does_not_merge() {
        let gateway = Gateway::new(GatewayConfig::default());
        let result = gateway
            .make_request(SUBSCRIBE_METHOD, params(json!({"objects": {"toolhead": null}})))
            .await;
        assert!(matches!(result, Err(GatewayError::BackendUnavailable(_))));
        assert!(gateway.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests_and_resets_epoch() {
        let gateway = Gateway::new(GatewayConfig::default());
        let (local, _remote) = duplex(64 * 1024);
        let _events = gateway.connection().attach(local);
        let mut rx = gateway.event_bus().subscribe();

        let (Ok(first), Ok(second)) = (
            gateway.issue("info", Map::new()),
            gateway.issue(SUBSCRIBE_METHOD, params(json!({"objects": {"A": ["x"]}}))),
        ) else {
            panic!("issue failed");
        };
        gateway.mark_milestone(Milestone::WebhooksSubscribed);
        assert_eq!(gateway.pending_requests(), 2);
        assert_eq!(gateway.subscriptions().len(), 1);

        gateway.on_connection_closed();

        assert_eq!(gateway.pending_requests(), 0);
        assert!(gateway.subscriptions().is_empty());
        assert!(gateway.status().checklist.is_empty());
        assert_eq!(gateway.connection_state(), ConnectionState::Disconnected);
        for pending in [first, second] {
            let Err(err) = pending.wait().await else {
                panic!("expected failure");
            };
            assert!(err.is_unavailable());
        }
        assert!(matches!(
            gateway.issue("info", Map::new()),
            Err(GatewayError::BackendUnavailable(_))
        ));
        assert_eq!(next_event(&mut rx).await.name(), KLIPPY_DISCONNECT);
    }
}
