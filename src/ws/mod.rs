//! WebSocket layer: connection handling and message routing.
//!
//! The WebSocket endpoint at `/websocket` pushes every gateway event to
//! every client and forwards client commands to the backend.

pub mod connection;
pub mod handler;
pub mod messages;
