//! # klippy-gateway
//!
//! HTTP and WebSocket gateway for the Klippy host process.
//!
//! The gateway keeps a single connection to Klippy's Unix socket, turns
//! client calls into Klippy's JSON RPC dialect, correlates the responses,
//! folds every client subscription into the one subscription Klippy
//! supports, and reconnects whenever Klippy restarts.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── Gateway + readiness handshake (service/)
//!     ├── EventBus, EndpointRegistry (domain/)
//!     ├── PluginRegistry, FileManager (plugins/)
//!     │
//!     ├── RequestRegistry, SubscriptionTable (backend/)
//!     ├── BackendConnection + wire codec (backend/)
//!     │
//!     └── Klippy (Unix socket, 0x03-terminated JSON)
//! ```

pub mod api;
pub mod app_state;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod plugins;
pub mod service;
pub mod ws;

mod sync;
