//! Heater temperature history.
//!
//! Once the backend is ready the store asks for `heaters.available_sensors`,
//! subscribes to every sensor and keeps the latest `temperature`/`target`
//! pair from each `server:status_update`. A sampler task appends those
//! values to a fixed-size ring per sensor on every tick, so clients can
//! draw the last twenty minutes of history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use utoipa::ToSchema;

use super::{Plugin, Shutdown};
use crate::domain::gateway_event::{KLIPPY_READY, STATUS_UPDATE};
use crate::domain::{EventBus, GatewayEvent};
use crate::service::Gateway;
use crate::sync;

/// Name the temperature store is registered under.
pub const PLUGIN_NAME: &str = "temperature_store";

/// Samples kept per sensor: twenty minutes at one sample per second.
pub const TEMPERATURE_STORE_SIZE: usize = 20 * 60;

/// Recorded history of one sensor, oldest sample first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct SensorHistory {
    /// Measured temperatures, rounded to two decimals.
    pub temperatures: Vec<f64>,
    /// Target temperatures.
    pub targets: Vec<f64>,
}

#[derive(Debug, Default)]
struct Series {
    temperatures: VecDeque<f64>,
    targets: VecDeque<f64>,
}

impl Series {
    fn push(&mut self, temperature: f64, target: f64) {
        if self.temperatures.len() >= TEMPERATURE_STORE_SIZE {
            self.temperatures.pop_front();
            self.targets.pop_front();
        }
        self.temperatures.push_back(temperature);
        self.targets.push_back(target);
    }
}

#[derive(Debug, Default)]
struct Readings {
    series: BTreeMap<String, Series>,
    latest: BTreeMap<String, (f64, f64)>,
}

/// Ring buffers of heater readings keyed by sensor name.
#[derive(Debug)]
pub struct TemperatureStore {
    readings: RwLock<Readings>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    sample_interval: Duration,
}

impl TemperatureStore {
    /// Creates an empty store that samples every `sample_interval`.
    #[must_use]
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            readings: RwLock::new(Readings::default()),
            sampler: Mutex::new(None),
            sample_interval,
        }
    }

    /// Tracks exactly `sensors`. History of sensors that stay tracked is
    /// kept; everything else is dropped.
    pub fn configure(&self, sensors: &[String]) {
        let mut readings = sync::write(&self.readings);
        let mut previous = std::mem::take(&mut readings.series);
        readings.series = sensors
            .iter()
            .map(|name| (name.clone(), previous.remove(name).unwrap_or_default()))
            .collect();
        let Readings { series, latest } = &mut *readings;
        latest.retain(|name, _| series.contains_key(name));
    }

    /// Returns the tracked sensor names, sorted.
    #[must_use]
    pub fn sensors(&self) -> Vec<String> {
        sync::read(&self.readings).series.keys().cloned().collect()
    }

    /// Takes the latest reading of every tracked sensor present in a
    /// status update. Fields missing from the update keep their previous
    /// value.
    pub fn record(&self, status: &Map<String, Value>) {
        let mut readings = sync::write(&self.readings);
        let Readings { series, latest } = &mut *readings;
        for name in series.keys() {
            let Some(update) = status.get(name) else {
                continue;
            };
            let (last_temperature, last_target) = latest.get(name).copied().unwrap_or_default();
            let temperature = update
                .get("temperature")
                .and_then(Value::as_f64)
                .map_or(last_temperature, round_hundredths);
            let target = update
                .get("target")
                .and_then(Value::as_f64)
                .unwrap_or(last_target);
            latest.insert(name.clone(), (temperature, target));
        }
    }

    /// Appends the latest reading of every sensor to its history.
    pub fn sample(&self) {
        let mut readings = sync::write(&self.readings);
        let Readings { series, latest } = &mut *readings;
        for (name, (temperature, target)) in latest.iter() {
            if let Some(history) = series.get_mut(name) {
                history.push(*temperature, *target);
            }
        }
    }

    /// Returns a copy of every sensor's history.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, SensorHistory> {
        sync::read(&self.readings)
            .series
            .iter()
            .map(|(name, series)| {
                let history = SensorHistory {
                    temperatures: series.temperatures.iter().copied().collect(),
                    targets: series.targets.iter().copied().collect(),
                };
                (name.clone(), history)
            })
            .collect()
    }

    /// Returns `true` while the sampler task is running.
    #[must_use]
    pub fn is_sampling(&self) -> bool {
        sync::lock(&self.sampler).is_some()
    }

    /// Fetches the available sensors and subscribes to them.
    ///
    /// Failures are logged; the store is left as it was.
    pub async fn initialize(self: &Arc<Self>, gateway: &Gateway) {
        let mut query = Map::new();
        query.insert(
            "heaters".to_string(),
            Value::Array(vec![Value::String("available_sensors".to_string())]),
        );
        let status = match gateway.query_objects(query).await {
            Ok(status) => status,
            Err(err) => {
                tracing::info!(error = %err, "error configuring sensors");
                return;
            }
        };
        let sensors: Vec<String> = status
            .get("heaters")
            .and_then(|heaters| heaters.get("available_sensors"))
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        if sensors.is_empty() {
            tracing::info!("no sensors found");
            self.configure(&[]);
            self.stop_sampling();
            return;
        }

        let objects: Map<String, Value> = sensors
            .iter()
            .map(|sensor| (sensor.clone(), Value::Null))
            .collect();
        if let Err(err) = gateway.subscribe_objects(objects).await {
            tracing::info!(error = %err, "error subscribing to sensors");
            return;
        }
        tracing::info!(sensors = ?sensors, "configuring available sensors");
        self.configure(&sensors);
        self.start_sampling();
    }

    fn start_sampling(self: &Arc<Self>) {
        let mut sampler = sync::lock(&self.sampler);
        if sampler.is_some() {
            return;
        }
        let store = Arc::downgrade(self);
        let period = self.sample_interval;
        *sampler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                store.sample();
            }
        }));
    }

    fn stop_sampling(&self) {
        if let Some(task) = sync::lock(&self.sampler).take() {
            task.abort();
        }
    }
}

impl Plugin for TemperatureStore {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn as_shutdown(&self) -> Option<&dyn Shutdown> {
        Some(self)
    }
}

impl Shutdown for TemperatureStore {
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move { self.stop_sampling() }.boxed()
    }
}

/// Hooks `store` onto the bus: status updates feed the latest readings and
/// every `server:klippy_ready` re-initializes the sensor list.
pub(crate) fn register_handlers(store: &Arc<TemperatureStore>, bus: &EventBus, gateway: Weak<Gateway>) {
    let recorder = Arc::clone(store);
    bus.register_event_handler(STATUS_UPDATE, move |event| {
        let store = Arc::clone(&recorder);
        async move {
            if let GatewayEvent::StatusUpdate { status, .. } = event {
                store.record(&status);
            }
        }
    });

    let store = Arc::clone(store);
    bus.register_event_handler(KLIPPY_READY, move |_| {
        let store = Arc::clone(&store);
        let gateway = gateway.clone();
        async move {
            if let Some(gateway) = gateway.upgrade() {
                store.initialize(&gateway).await;
            }
        }
    });
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
