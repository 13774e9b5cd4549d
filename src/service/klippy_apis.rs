//! Typed wrappers around the backend's webhook methods.

use serde_json::{Map, Value, json};

use super::gateway::{GCODE_RESPONSE_METHOD, Gateway};
use crate::backend::request::OK_MARKER;
use crate::backend::subscription::SUBSCRIBE_METHOD;
use crate::error::GatewayError;

/// Backend method returning host information and state.
pub const INFO_METHOD: &str = "info";
/// Backend method listing loaded printer objects.
pub const OBJECTS_LIST_METHOD: &str = "objects/list";
/// Backend method returning a one-shot status query.
pub const OBJECTS_QUERY_METHOD: &str = "objects/query";
/// Backend method routing g-code output to a notification.
pub const GCODE_OUTPUT_METHOD: &str = "gcode/subscribe_output";
/// Backend method listing remote endpoints.
pub const LIST_ENDPOINTS_METHOD: &str = "list_endpoints";
/// Backend method running a g-code script.
pub const GCODE_SCRIPT_METHOD: &str = "gcode/script";

impl Gateway {
    /// Fetches the backend `info` mapping (`state`, `state_message`,
    /// paths, ...).
    ///
    /// # Errors
    ///
    /// Propagates request errors; fails with [`GatewayError::Internal`] if
    /// the result is not a mapping.
    pub async fn get_klippy_info(&self) -> Result<Map<String, Value>, GatewayError> {
        let result = self.make_request(INFO_METHOD, Map::new()).await?;
        into_object(result, INFO_METHOD)
    }

    /// Lists the printer objects the backend has loaded.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn get_object_list(&self) -> Result<Vec<String>, GatewayError> {
        let result = self.make_request(OBJECTS_LIST_METHOD, Map::new()).await?;
        Ok(string_list(&result, "objects"))
    }

    /// Queries the current status of `objects` (name → field list or
    /// `null`). Returns the `status` mapping.
    ///
    /// # Errors
    ///
    /// Propagates request errors; fails with [`GatewayError::Internal`] if
    /// the result is not a mapping.
    pub async fn query_objects(
        &self,
        objects: Map<String, Value>,
    ) -> Result<Map<String, Value>, GatewayError> {
        let mut params = Map::new();
        params.insert("objects".to_string(), Value::Object(objects));
        let mut result = into_object(
            self.make_request(OBJECTS_QUERY_METHOD, params).await?,
            OBJECTS_QUERY_METHOD,
        )?;
        match result.remove("status") {
            Some(Value::Object(status)) => Ok(status),
            _ => Ok(result),
        }
    }

    /// Adds `objects` to the aggregated subscription.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn subscribe_objects(
        &self,
        objects: Map<String, Value>,
    ) -> Result<Value, GatewayError> {
        let mut params = Map::new();
        params.insert("objects".to_string(), Value::Object(objects));
        self.make_request(SUBSCRIBE_METHOD, params).await
    }

    /// Routes backend g-code output to `process_gcode_response`.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn subscribe_gcode_output(&self) -> Result<Value, GatewayError> {
        let mut params = Map::new();
        params.insert(
            "response_template".to_string(),
            json!({ "method": GCODE_RESPONSE_METHOD }),
        );
        self.make_request(GCODE_OUTPUT_METHOD, params).await
    }

    /// Lists the remote endpoints the backend exposes.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn list_endpoints(&self) -> Result<Vec<String>, GatewayError> {
        let result = self.make_request(LIST_ENDPOINTS_METHOD, Map::new()).await?;
        Ok(string_list(&result, "endpoints"))
    }

    /// Runs a g-code script and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Propagates request errors, including g-code errors reported by the
    /// backend as [`GatewayError::BadRequest`].
    pub async fn run_gcode(&self, script: &str) -> Result<Value, GatewayError> {
        let mut params = Map::new();
        params.insert("script".to_string(), Value::String(script.to_string()));
        self.make_request(GCODE_SCRIPT_METHOD, params).await
    }
}

fn into_object(value: Value, method: &str) -> Result<Map<String, Value>, GatewayError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::String(s) if s == OK_MARKER => Ok(Map::new()),
        other => Err(GatewayError::Internal(format!(
            "unexpected {method} result: {other}"
        ))),
    }
}

/// Reads `result[key]` as a list of strings; anything missing is empty.
fn string_list(result: &Value, key: &str) -> Vec<String> {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_an_empty_mapping() {
        assert!(matches!(into_object(json!(OK_MARKER), INFO_METHOD), Ok(m) if m.is_empty()));
        assert!(matches!(
            into_object(json!([1, 2]), INFO_METHOD),
            Err(GatewayError::Internal(_))
        ));
    }

    #[test]
    fn string_list_skips_non_strings() {
        let result = json!({"endpoints": ["/printer/info", 3, "/gcode/script"]});
        assert_eq!(
            string_list(&result, "endpoints"),
            vec!["/printer/info".to_string(), "/gcode/script".to_string()]
        );
        assert!(string_list(&json!(OK_MARKER), "objects").is_empty());
    }
}
