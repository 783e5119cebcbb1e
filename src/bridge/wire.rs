//! Call and Answer envelopes exchanged as JSON text.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use super::error::{BridgeError, NativeError};
use super::handle::HandleId;

/// Request from the script side to invoke an exposed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub interface_name: String,
    pub function_name: String,
    #[serde(default)]
    pub arguments: Vec<Json>,
    /// Completion handle for full-promise calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promise_function_binding: Option<HandleId>,
}

impl Call {
    pub fn new(
        interface_name: impl Into<String>,
        function_name: impl Into<String>,
        arguments: Vec<Json>,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            function_name: function_name.into(),
            arguments,
            promise_function_binding: None,
        }
    }

    pub fn with_promise_binding(mut self, handle: HandleId) -> Self {
        self.promise_function_binding = Some(handle);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::MalformedMessage(e.to_string()))
    }

    pub(crate) fn qualified_name(&self) -> String {
        format!("{}.{}", self.interface_name, self.function_name)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_true() -> bool {
    true
}

/// Error payload of an Answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stack_trace: String,
    /// Fault category; peers that do not know it ignore it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<&BridgeError> for ErrorInfo {
    fn from(error: &BridgeError) -> Self {
        Self {
            message: error.to_string(),
            stack_trace: error.stack_trace(),
            kind: Some(error.kind().to_string()),
        }
    }
}

/// Result of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default = "default_true")]
    pub is_void: bool,
    #[serde(default)]
    pub value: Json,
}

impl Answer {
    pub fn void() -> Self {
        Self {
            has_error: false,
            error: None,
            is_void: true,
            value: Json::Null,
        }
    }

    pub fn value(value: Json) -> Self {
        Self {
            has_error: false,
            error: None,
            is_void: false,
            value,
        }
    }

    pub fn error(error: &BridgeError) -> Self {
        Self {
            has_error: true,
            error: Some(ErrorInfo::from(error)),
            is_void: true,
            value: Json::Null,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::MalformedMessage(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(target: "jsbridge::wire", "Failed to serialize answer: {}", err);
                r#"{"hasError":true,"error":{"message":"Failed to serialize answer","stackTrace":""},"isVoid":true}"#
                    .to_string()
            }
        }
    }

    fn error_parts(&self) -> (String, String) {
        match &self.error {
            Some(info) => (info.message.clone(), info.stack_trace.clone()),
            None => ("Unknown error".to_string(), String::new()),
        }
    }

    /// Interpret an answer received from the script side.
    ///
    /// `Ok(None)` means void.
    pub fn into_remote_result(self) -> Result<Option<Json>, BridgeError> {
        if self.has_error {
            let (message, stack_trace) = self.error_parts();
            return Err(BridgeError::RemoteFault {
                message,
                stack_trace,
            });
        }
        Ok(if self.is_void { None } else { Some(self.value) })
    }

    /// Interpret an answer received from the host side.
    pub fn into_native_result(self) -> Result<Option<Json>, BridgeError> {
        if self.has_error {
            let (message, stack_trace) = self.error_parts();
            return Err(NativeError::new(message, stack_trace).into());
        }
        Ok(if self.is_void { None } else { Some(self.value) })
    }
}
