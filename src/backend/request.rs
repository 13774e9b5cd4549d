//! Outstanding request tracking and response correlation.
//!
//! [`RequestRegistry`] allocates request ids from a monotonic counter,
//! keeps one [`TrackedRequest`] per outstanding call and resolves it when
//! the matching response arrives or the connection drops. Each tracked
//! request owns a oneshot sender, so it can be resolved at most once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use super::codec::{self, OutboundRequest};
use super::connection::BackendConnection;
use crate::domain::RequestId;
use crate::error::GatewayError;
use crate::sync;

/// Success value substituted for an empty backend result.
pub const OK_MARKER: &str = "ok";

/// Outcome delivered to a waiting caller.
pub type RequestOutcome = Result<Value, GatewayError>;

/// One request awaiting its response.
#[derive(Debug)]
pub struct TrackedRequest {
    method: String,
    params: Map<String, Value>,
    issued_at: Instant,
    completion: oneshot::Sender<RequestOutcome>,
}

impl TrackedRequest {
    /// Returns the backend method this request called.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the parameters the request was sent with.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn complete(self, outcome: RequestOutcome) {
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.completion.send(outcome);
    }
}

/// Caller side of an issued request.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    method: String,
    receiver: oneshot::Receiver<RequestOutcome>,
    heartbeat: Duration,
}

impl PendingResponse {
    /// Returns the id the request was sent with.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the response.
    ///
    /// Every heartbeat interval without a resolution logs how long the
    /// request has been pending; the wait itself never times out.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or [`GatewayError::BackendUnavailable`]
    /// if the connection dropped first.
    pub async fn wait(mut self) -> RequestOutcome {
        let started = Instant::now();
        loop {
            match tokio::time::timeout(self.heartbeat, &mut self.receiver).await {
                Ok(Ok(outcome)) => return outcome,
                Ok(Err(_)) => return Err(GatewayError::disconnected()),
                Err(_) => {
                    tracing::info!(
                        id = %self.id,
                        method = %self.method,
                        pending_secs = format_args!("{:.2}", started.elapsed().as_secs_f64()),
                        "request pending"
                    );
                }
            }
        }
    }
}

/// Table of outstanding requests keyed by [`RequestId`].
#[derive(Debug)]
pub struct RequestRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, TrackedRequest>>,
    heartbeat: Duration,
}

impl RequestRegistry {
    /// Creates an empty registry whose waiters log every `heartbeat`.
    #[must_use]
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            heartbeat,
        }
    }

    /// Allocates an id, tracks the request and queues it on `connection`.
    ///
    /// Does not wait; call [`PendingResponse::wait`] on the result.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BackendUnavailable`] if no connection is
    /// active, or [`GatewayError::Serialization`] if the params cannot be
    /// encoded. The request is not left behind in either case.
    pub fn issue(
        &self,
        connection: &BackendConnection,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<PendingResponse, GatewayError> {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = OutboundRequest {
            id,
            method: method.to_string(),
            params,
        };
        let frame = codec::encode_frame(&request)?;

        let (completion, receiver) = oneshot::channel();
        sync::lock(&self.pending).insert(
            id,
            TrackedRequest {
                method: request.method,
                params: request.params,
                issued_at: Instant::now(),
                completion,
            },
        );

        if let Err(err) = connection.send(frame) {
            sync::lock(&self.pending).remove(&id);
            return Err(err);
        }
        tracing::debug!(%id, method, "request sent");

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            receiver,
            heartbeat: self.heartbeat,
        })
    }

    /// Resolves the request matching `id` with a backend outcome.
    ///
    /// Empty results become [`OK_MARKER`]; backend errors become
    /// [`GatewayError::BadRequest`]. Returns `false` (and logs) when no
    /// request with that id is outstanding.
    pub fn resolve(&self, id: Option<RequestId>, outcome: Result<Value, String>) -> bool {
        let request = id.and_then(|id| sync::lock(&self.pending).remove(&id));
        let Some(request) = request else {
            tracing::info!(id = ?id.map(RequestId::get), ?outcome, "no request matching response id");
            return false;
        };

        tracing::debug!(
            id = ?id.map(RequestId::get),
            method = %request.method,
            elapsed_ms = request.issued_at.elapsed().as_millis(),
            "request resolved"
        );
        let outcome = match outcome {
            Ok(result) if is_falsy(&result) => Ok(Value::String(OK_MARKER.to_string())),
            Ok(result) => Ok(result),
            Err(message) => Err(GatewayError::BadRequest(message)),
        };
        request.complete(outcome);
        true
    }

    /// Fails every outstanding request with `error` and empties the
    /// registry. Returns how many requests were failed.
    pub fn fail_all(&self, error: &GatewayError) -> usize {
        let drained: Vec<TrackedRequest> = sync::lock(&self.pending)
            .drain()
            .map(|(_, request)| request)
            .collect();
        let count = drained.len();
        for request in drained {
            request.complete(Err(error.clone()));
        }
        count
    }

    /// Returns the number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        sync::lock(&self.pending).len()
    }

    /// Returns `true` if nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        sync::lock(&self.pending).is_empty()
    }
}

/// Truthiness of a backend result: `null`, `false`, zero, and empty
/// strings, arrays and objects count as empty.
#[must_use]
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, duplex};
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::codec::FRAME_TERMINATOR;
    use crate::backend::connection::ConnectionEvent;

    struct Peer {
        _events: mpsc::UnboundedReceiver<ConnectionEvent>,
        remote: BufReader<DuplexStream>,
    }

    fn connected() -> (BackendConnection, Peer) {
        let conn = BackendConnection::new();
        let (local, remote) = duplex(64 * 1024);
        let events = conn.attach(local);
        let peer = Peer {
            _events: events,
            remote: BufReader::new(remote),
        };
        (conn, peer)
    }

    async fn read_request(peer: &mut Peer) -> OutboundRequest {
        let mut buf = Vec::new();
        let Ok(_) = peer.remote.read_until(FRAME_TERMINATOR, &mut buf).await else {
            panic!("read failed");
        };
        let body = buf.strip_suffix(&[FRAME_TERMINATOR]).unwrap_or(&buf);
        let Ok(request) = serde_json::from_slice(body) else {
            panic!("bad frame");
        };
        request
    }

    #[test]
    fn falsy_values() {
        for value in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(is_falsy(&value), "{value} should be falsy");
        }
        for value in [json!(true), json!(1), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(!is_falsy(&value), "{value} should be truthy");
        }
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let (conn, _peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..50 {
            let Ok(pending) = registry.issue(&conn, "info", Map::new()) else {
                panic!("issue failed");
            };
            assert!(pending.id().get() > last);
            last = pending.id().get();
            assert!(seen.insert(pending.id()));
        }
        assert_eq!(registry.len(), 50);
    }

    #[tokio::test]
    async fn empty_result_becomes_ok_marker() {
        let (conn, mut peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let Ok(pending) = registry.issue(&conn, "get_info", Map::new()) else {
            panic!("issue failed");
        };
        let sent = read_request(&mut peer).await;
        assert_eq!(sent.method, "get_info");
        assert_eq!(sent.id, pending.id());

        assert!(registry.resolve(Some(sent.id), Ok(json!({}))));
        assert_eq!(pending.wait().await.ok(), Some(json!(OK_MARKER)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn backend_error_becomes_bad_request() {
        let (conn, _peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let Ok(pending) = registry.issue(&conn, "gcode/script", Map::new()) else {
            panic!("issue failed");
        };
        registry.resolve(Some(pending.id()), Err("Must home axis first".to_string()));
        let Err(GatewayError::BadRequest(message)) = pending.wait().await else {
            panic!("expected bad request");
        };
        assert_eq!(message, "Must home axis first");
    }

    #[tokio::test]
    async fn responses_resolve_only_their_own_request() {
        let (conn, _peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let (Ok(first), Ok(second)) = (
            registry.issue(&conn, "a", Map::new()),
            registry.issue(&conn, "b", Map::new()),
        ) else {
            panic!("issue failed");
        };

        registry.resolve(Some(second.id()), Ok(json!("second")));
        registry.resolve(Some(first.id()), Ok(json!("first")));

        assert_eq!(first.wait().await.ok(), Some(json!("first")));
        assert_eq!(second.wait().await.ok(), Some(json!("second")));
    }

    #[tokio::test]
    async fn duplicate_and_unknown_ids_are_dropped() {
        let (conn, _peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let Ok(pending) = registry.issue(&conn, "info", Map::new()) else {
            panic!("issue failed");
        };
        assert!(registry.resolve(Some(pending.id()), Ok(json!(1))));
        assert!(!registry.resolve(Some(pending.id()), Ok(json!(2))));
        assert!(!registry.resolve(Some(RequestId::new(999_999)), Ok(json!(3))));
        assert!(!registry.resolve(None, Ok(json!(4))));
        assert_eq!(pending.wait().await.ok(), Some(json!(1)));
    }

    #[tokio::test]
    async fn fail_all_resolves_every_pending_request() {
        let (conn, _peer) = connected();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let (Ok(a), Ok(b)) = (
            registry.issue(&conn, "a", Map::new()),
            registry.issue(&conn, "b", Map::new()),
        ) else {
            panic!("issue failed");
        };

        assert_eq!(registry.fail_all(&GatewayError::disconnected()), 2);
        assert!(registry.is_empty());
        for pending in [a, b] {
            let Err(err) = pending.wait().await else {
                panic!("expected failure");
            };
            assert!(err.is_unavailable());
        }
    }

    #[tokio::test]
    async fn issue_without_connection_leaves_nothing_behind() {
        let conn = BackendConnection::new();
        let registry = RequestRegistry::new(Duration::from_secs(60));
        let result = registry.issue(&conn, "info", Map::new());
        assert!(matches!(result, Err(GatewayError::BackendUnavailable(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_does_not_cancel_the_wait() {
        let (conn, _peer) = connected();
        let registry = std::sync::Arc::new(RequestRegistry::new(Duration::from_secs(60)));
        let Ok(pending) = registry.issue(&conn, "gcode/script", Map::new()) else {
            panic!("issue failed");
        };
        let id = pending.id();
        let waiter = tokio::spawn(pending.wait());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!waiter.is_finished());

        registry.resolve(Some(id), Ok(json!({"done": true})));
        let Ok(outcome) = waiter.await else {
            panic!("waiter panicked");
        };
        assert_eq!(outcome.ok(), Some(json!({"done": true})));
    }
}
