//! Post-connect handshake.
//!
//! After each successful connection the gateway polls the backend on a
//! fixed interval until every required [`Milestone`] is reached: the
//! backend reports `ready`, the `webhooks` object is subscribed and g-code
//! output is routed to the gateway. Each step is skipped once its
//! milestone is recorded, so a failed step is simply retried on the next
//! tick. The task is aborted when the connection closes.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::MissedTickBehavior;

use super::gateway::Gateway;
use crate::domain::{GatewayEvent, Milestone};
use crate::plugins::file_manager::FIXED_PATH_KEYS;

/// Printer objects the gateway needs for full functionality.
pub const REQUIRED_OBJECTS: [&str; 3] = ["virtual_sdcard", "display_status", "pause_resume"];

/// File root the virtual SD card directory is registered under.
pub const GCODES_ROOT: &str = "gcodes";

/// Polls until the handshake completes.
pub async fn run(gateway: Arc<Gateway>) {
    let mut ticker = tokio::time::interval(gateway.config().init_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        poll_once(&gateway).await;
        if gateway.is_initialized() {
            tracing::info!("klippy initialization complete");
            return;
        }
    }
}

/// Runs every handshake step whose milestone is still missing.
pub async fn poll_once(gateway: &Gateway) {
    if !gateway.has_milestone(Milestone::KlippyReady) {
        check_ready(gateway).await;
    }
    if !gateway.has_milestone(Milestone::EndpointsRegistered) {
        request_endpoints(gateway).await;
    }

    if !gateway.has_milestone(Milestone::WebhooksSubscribed) {
        let mut objects = Map::new();
        objects.insert("webhooks".to_string(), Value::Null);
        match gateway.subscribe_objects(objects).await {
            Ok(_) => {
                tracing::info!("webhooks subscribed");
                gateway.mark_milestone(Milestone::WebhooksSubscribed);
            }
            Err(err) => tracing::info!(error = %err, "unable to subscribe to webhooks object"),
        }
    }

    if !gateway.has_milestone(Milestone::GcodeOutputSubscribed) {
        match gateway.subscribe_gcode_output().await {
            Ok(_) => {
                tracing::info!("gcode output subscribed");
                gateway.mark_milestone(Milestone::GcodeOutputSubscribed);
            }
            Err(err) => {
                tracing::info!(error = %err, "unable to register gcode output subscription");
            }
        }
    }
}

async fn check_ready(gateway: &Gateway) {
    let info = match gateway.get_klippy_info().await {
        Ok(info) => info,
        Err(err) => {
            tracing::info!(
                error = %err,
                "klippy info request failed; klippy may have hit an error during startup, check klippy.log"
            );
            return;
        }
    };

    let fixed_paths: Map<String, Value> = FIXED_PATH_KEYS
        .iter()
        .filter_map(|key| info.get(*key).map(|value| ((*key).to_string(), value.clone())))
        .collect();
    gateway.file_manager().update_fixed_paths(&fixed_paths);

    if info.get("state").and_then(Value::as_str) != Some("ready") {
        let message = info
            .get("state_message")
            .and_then(Value::as_str)
            .unwrap_or("Klippy Not Ready");
        tracing::info!(state_message = message, "klippy not ready");
        return;
    }

    verify_requirements(gateway).await;
    if gateway.mark_ready() {
        tracing::info!("klippy ready");
        gateway.event_bus().send_event(GatewayEvent::klippy_ready());
    }
}

async fn request_endpoints(gateway: &Gateway) {
    match gateway.list_endpoints().await {
        Ok(endpoints) if !endpoints.is_empty() => {
            let added = endpoints
                .iter()
                .filter(|endpoint| gateway.endpoints().register(endpoint))
                .count();
            gateway.mark_milestone(Milestone::EndpointsRegistered);
            tracing::info!(endpoints = endpoints.len(), added, "remote endpoints registered");
        }
        Ok(_) => tracing::debug!("klippy reported no endpoints"),
        Err(err) => tracing::debug!(error = %err, "list_endpoints request failed"),
    }
}

async fn verify_requirements(gateway: &Gateway) {
    let objects = match gateway.get_object_list().await {
        Ok(objects) => objects,
        Err(err) => {
            tracing::info!(error = %err, "unable to retrieve klipper object list");
            return;
        }
    };

    let missing = missing_objects(&objects);
    if !missing.is_empty() {
        let sections: Vec<String> = missing.iter().map(|o| format!("[{o}]")).collect();
        tracing::warn!(
            missing = %sections.join(", "),
            "printer objects not detected; add these sections to printer.cfg for full functionality"
        );
    }
    if !missing.contains(&"virtual_sdcard") {
        register_sdcard_path(gateway).await;
    }
}

/// Returns the required objects absent from `objects`, in declaration
/// order.
#[must_use]
pub fn missing_objects(objects: &[String]) -> Vec<&'static str> {
    REQUIRED_OBJECTS
        .iter()
        .copied()
        .filter(|required| !objects.iter().any(|o| o == required))
        .collect()
}

async fn register_sdcard_path(gateway: &Gateway) {
    let mut query = Map::new();
    query.insert("configfile".to_string(), Value::Null);
    let status = match gateway.query_objects(query).await {
        Ok(status) => status,
        Err(err) => {
            tracing::info!(error = %err, "unable to set sd card path");
            return;
        }
    };

    let path = status
        .get("configfile")
        .and_then(|c| c.get("config"))
        .and_then(|c| c.get("virtual_sdcard"))
        .and_then(|c| c.get("path"))
        .and_then(Value::as_str);
    match path {
        Some(path) => gateway
            .file_manager()
            .register_directory(GCODES_ROOT, path, true),
        None => tracing::info!("configuration for [virtual_sdcard] not found; sd card path not set"),
    }
}
