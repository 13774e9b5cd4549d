//! Aggregated backend subscription.
//!
//! The backend holds exactly one subscription set for the gateway, and a
//! new `objects/subscribe` call replaces it. Every subscribe request is
//! therefore rewritten to carry the union of everything any client has
//! asked for during the current connection, and to route updates through
//! the `process_status_update` notification. All clients receive that
//! union; there is no per-client filtering.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

/// Backend method that replaces the subscription set.
pub const SUBSCRIBE_METHOD: &str = "objects/subscribe";

/// Notification the backend is told to deliver subscribed data through.
pub const STATUS_UPDATE_METHOD: &str = "process_status_update";

/// Fields requested for one printer object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// Every field of the object.
    All,
    /// Only the named fields.
    Fields(BTreeSet<String>),
}

impl FieldSelection {
    /// Interprets a request value: a non-empty list of names selects those
    /// fields; `null`, an empty list or anything else selects all fields.
    #[must_use]
    pub fn from_request(value: &Value) -> Self {
        match value {
            Value::Array(items) if !items.is_empty() => Self::Fields(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Self::All,
        }
    }

    /// Combines two selections. `All` absorbs everything; field sets
    /// combine by union.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Fields(mut a), Self::Fields(b)) => {
                a.extend(b);
                Self::Fields(a)
            }
            _ => Self::All,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::All => Value::Null,
            Self::Fields(fields) => Value::Array(fields.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Union of every subscription requested during one connection epoch.
///
/// Entries only ever grow: a field set can widen or become `All`, but
/// `All` never narrows back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionTable {
    objects: BTreeMap<String, FieldSelection>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one requested object into the table.
    pub fn merge_object(&mut self, name: &str, selection: FieldSelection) {
        let merged = match self.objects.remove(name) {
            Some(existing) => existing.merge(selection),
            None => selection,
        };
        self.objects.insert(name.to_string(), merged);
    }

    /// Merges every object of a request's `objects` mapping.
    pub fn merge(&mut self, requested: &Map<String, Value>) {
        for (name, fields) in requested {
            self.merge_object(name, FieldSelection::from_request(fields));
        }
    }

    /// Merges `params.objects` and rewrites `params` to declare the whole
    /// table, with updates routed through [`STATUS_UPDATE_METHOD`].
    pub fn rewrite_request(&mut self, params: &mut Map<String, Value>) {
        if let Some(Value::Object(requested)) = params.get("objects") {
            self.merge(requested);
        }
        params.insert("objects".to_string(), Value::Object(self.to_objects()));
        params.insert(
            "response_template".to_string(),
            json!({ "method": STATUS_UPDATE_METHOD }),
        );
    }

    /// Returns the table in wire form: `null` for all fields, otherwise a
    /// sorted list of field names.
    #[must_use]
    pub fn to_objects(&self) -> Map<String, Value> {
        self.objects
            .iter()
            .map(|(name, selection)| (name.clone(), selection.to_value()))
            .collect()
    }

    /// Returns the selection recorded for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSelection> {
        self.objects.get(name)
    }

    /// Returns the number of subscribed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Forgets every subscription, starting a new epoch.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
