//! Type-safe backend request identifier.
//!
//! [`RequestId`] is a newtype wrapper around the `u64` placed in the `id`
//! field of every outbound frame, so that request identities cannot be
//! confused with other integers (event times, counts).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one outbound backend request.
///
/// Allocated from a monotonic counter owned by the request registry and
/// never reused while the process runs. Used as the key of the pending
/// request table and as the correlation id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw wire id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw wire id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_integer() {
        let id = RequestId::new(42);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "42");
        let Ok(back) = serde_json::from_str::<RequestId>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(back, id);
    }

    #[test]
    fn display_is_raw_number() {
        assert_eq!(RequestId::from(7).to_string(), "7");
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(RequestId::new(1) < RequestId::new(2));
        assert_eq!(u64::from(RequestId::new(9)), 9);
    }
}
