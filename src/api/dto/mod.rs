//! Data Transfer Objects for REST request/response serialization.
//!
//! Successful responses wrap their payload in a `result` field, matching
//! what WebSocket clients receive for the same call.

pub mod printer_dto;
pub mod server_dto;

pub use printer_dto::*;
pub use server_dto::*;
