//! Shared fixtures: a scripted Klippy host on a real Unix socket.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use klippy_gateway::config::GatewayConfig;

/// Endpoints the fake host advertises through `list_endpoints`.
pub const ENDPOINTS: [&str; 7] = [
    "info",
    "objects/list",
    "objects/query",
    "objects/subscribe",
    "gcode/script",
    "gcode/subscribe_output",
    "list_endpoints",
];

/// Path the fake host reports for the virtual SD card.
pub const SDCARD_PATH: &str = "/home/pi/gcode_files";

/// One request as the fake host saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub method: String,
    pub params: Value,
}

enum Control {
    Push(Value),
    Drop,
}

#[derive(Default)]
struct Shared {
    ready: AtomicBool,
    connections: AtomicUsize,
    received: Mutex<Vec<Received>>,
    held: Mutex<HashSet<String>>,
    sensors: Mutex<Vec<String>>,
    client: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

/// Scripted stand-in for the Klippy host.
pub struct FakeKlippy {
    pub path: PathBuf,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl FakeKlippy {
    /// Starts listening on a fresh socket path.
    pub fn start(ready: bool) -> Self {
        Self::start_at(socket_path(), ready)
    }

    /// Starts listening on `path`, which may already be configured in a
    /// running gateway.
    pub fn start_at(path: PathBuf, ready: bool) -> Self {
        let listener = UnixListener::bind(&path).expect("bind fake klippy socket");
        let shared = Arc::new(Shared::default());
        shared.ready.store(ready, Ordering::SeqCst);

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let (control_tx, control_rx) = mpsc::unbounded_channel();
                *accept_shared.client.lock().unwrap() = Some(control_tx);
                tokio::spawn(serve(stream, index, Arc::clone(&accept_shared), control_rx));
            }
        });

        Self { path, shared, task }
    }

    /// Gateway settings pointed at this host, with short timers.
    pub fn config(&self) -> GatewayConfig {
        config_for(&self.path)
    }

    /// Heater sensors reported through `heaters.available_sensors`.
    pub fn set_sensors(&self, sensors: &[&str]) {
        *self.shared.sensors.lock().unwrap() = sensors.iter().map(|s| (*s).to_string()).collect();
    }

    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::SeqCst);
    }

    /// Leaves every future call of `method` unanswered.
    pub fn hold(&self, method: &str) {
        self.shared.held.lock().unwrap().insert(method.to_string());
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self, method: &str) -> Vec<Received> {
        self.shared
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Waits until at least `count` calls of `method` arrived.
    pub async fn wait_for(&self, method: &str, count: usize) -> Vec<Received> {
        eventually(|| self.received(method).len() >= count).await;
        self.received(method)
    }

    /// Sends a notification to the connected gateway.
    pub fn push(&self, method: &str, params: Value) {
        self.control(Control::Push(json!({"method": method, "params": params})));
    }

    /// Closes the current gateway connection.
    pub fn drop_connection(&self) {
        self.control(Control::Drop);
    }

    fn control(&self, message: Control) {
        let client = self.shared.client.lock().unwrap();
        let Some(client) = client.as_ref() else {
            panic!("no gateway connected");
        };
        let _ = client.send(message);
    }
}

/// A fresh socket path nothing listens on yet.
pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("klippy-{}.sock", uuid::Uuid::new_v4()))
}

/// Gateway settings pointed at `path`, with short timers.
pub fn config_for(path: &Path) -> GatewayConfig {
    GatewayConfig {
        klippy_address: path.to_path_buf(),
        reconnect_delay: Duration::from_millis(50),
        init_interval: Duration::from_millis(50),
        temperature_sample_interval: Duration::from_millis(20),
        ..GatewayConfig::default()
    }
}

impl Drop for FakeKlippy {
    fn drop(&mut self) {
        self.task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn serve(
    stream: UnixStream,
    index: usize,
    shared: Arc<Shared>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            read = reader.read_until(0x03, &mut buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                let frame = buf.strip_suffix(&[0x03]).unwrap_or(&buf);
                let request: Value = serde_json::from_slice(frame).expect("gateway sent valid JSON");
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request["params"].clone();
                shared.received.lock().unwrap().push(Received {
                    connection: index,
                    method: method.clone(),
                    params: params.clone(),
                });

                if method == "gcode/script" && params["script"] == "RESTART" {
                    return;
                }
                if shared.held.lock().unwrap().contains(&method) {
                    continue;
                }
                let sensors = shared.sensors.lock().unwrap().clone();
                let mut reply = answer(&method, &params, shared.ready.load(Ordering::SeqCst), &sensors);
                reply["id"] = request["id"].clone();
                if write_frame(&mut writer, &reply).await.is_err() {
                    return;
                }
            }
            message = control.recv() => {
                match message {
                    Some(Control::Push(notification)) => {
                        if write_frame(&mut writer, &notification).await.is_err() {
                            return;
                        }
                    }
                    Some(Control::Drop) | None => return,
                }
            }
        }
    }
}

fn answer(method: &str, params: &Value, ready: bool, sensors: &[String]) -> Value {
    match method {
        "info" if ready => json!({"result": {
            "state": "ready",
            "state_message": "Printer is ready",
            "klipper_path": "/home/pi/klipper",
            "python_path": "/home/pi/klippy-env/bin/python",
            "log_file": "/tmp/klippy.log",
            "config_file": "/home/pi/printer.cfg",
        }}),
        "info" => json!({"result": {
            "state": "startup",
            "state_message": "Printer is not ready",
            "klipper_path": "/home/pi/klipper",
        }}),
        "objects/list" => json!({"result": {
            "objects": ["webhooks", "virtual_sdcard", "display_status", "toolhead"],
        }}),
        "objects/query" if params["objects"].get("heaters").is_some() => json!({"result": {
            "eventtime": 12.5,
            "status": {"heaters": {"available_sensors": sensors}},
        }}),
        "objects/query" => json!({"result": {
            "eventtime": 12.5,
            "status": {"configfile": {"config": {"virtual_sdcard": {"path": SDCARD_PATH}}}},
        }}),
        "objects/subscribe" => json!({"result": {"eventtime": 12.5, "status": {}}}),
        "gcode/subscribe_output" => json!({"result": {}}),
        "list_endpoints" => json!({"result": {"endpoints": ENDPOINTS}}),
        "gcode/script" if params["script"] == "G999" => json!({"error": {
            "error": "WebRequestError",
            "message": "Unknown command:\"G999\"",
        }}),
        "gcode/script" => json!({"result": {}}),
        _ => json!({"error": format!("Unknown method: {method}")}),
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    let mut frame = serde_json::to_vec(value).expect("encode frame");
    frame.push(0x03);
    writer.write_all(&frame).await
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

/// Awaits `future`, failing the test after five seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(5), future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out"),
    }
}
