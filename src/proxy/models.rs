use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /server`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateServerRequest {
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    /// Passed to the runtime's start call as-is
    #[serde(default)]
    pub host_config: Option<Value>,
}

/// Immediate answer to an accepted `POST /server`; provisioning continues
/// in the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAccepted {
    pub request_id: String,
    pub code: String,
    pub message: String,
}

impl ServerAccepted {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            code: "0".to_string(),
            message: String::new(),
        }
    }
}
