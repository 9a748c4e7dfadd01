//! Transport to the agent backend: one generic messaging endpoint shared by all agents.
//!
//! Request: `POST {endpoint}` with `{"message", "agent_id"}`.
//! Response: `{"success": bool, "response"?: <any payload>}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Body sent to the messaging endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    pub agent_id: String,
}

/// Envelope returned by the endpoint. Anything but `success: true` with a
/// non-null `response` is a soft failure.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEnvelope {
    pub success: bool,
    pub response: Option<Value>,
}

impl AgentEnvelope {
    /// Read the envelope from any JSON value; non-object bodies read as unsuccessful.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self {
                success: false,
                response: None,
            };
        };
        let success = map.get("success").and_then(Value::as_bool) == Some(true);
        let response = map.remove("response").filter(|v| !v.is_null());
        Self { success, response }
    }

    /// The payload to normalize, only when the backend reported success.
    pub fn into_payload(self) -> Option<Value> {
        if self.success {
            self.response
        } else {
            None
        }
    }
}

/// Transport-level failure: nothing usable came back.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent endpoint returned {0}")]
    Status(String),
    #[error("agent response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Sends one user utterance to an agent. Implementations never retry.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, request: &AgentRequest) -> Result<AgentEnvelope, TransportError>;
}

/// HTTP transport over reqwest.
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn send(&self, request: &AgentRequest) -> Result<AgentEnvelope, TransportError> {
        let res = self.client.post(&self.endpoint).json(request).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Status(format!("{} {}", status, body.trim())));
        }
        let bytes = res.bytes().await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(AgentEnvelope::from_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_snake_case_agent_id() {
        let req = AgentRequest {
            message: "What is Amadeo?".to_string(),
            agent_id: "support-agent".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({ "message": "What is Amadeo?", "agent_id": "support-agent" })
        );
    }

    #[test]
    fn envelope_success_requires_true_and_response() {
        let ok = AgentEnvelope::from_value(json!({ "success": true, "response": "hi" }));
        assert_eq!(ok.into_payload(), Some(json!("hi")));

        let no_response = AgentEnvelope::from_value(json!({ "success": true }));
        assert_eq!(no_response.into_payload(), None);

        let null_response = AgentEnvelope::from_value(json!({ "success": true, "response": null }));
        assert_eq!(null_response.into_payload(), None);

        let failed = AgentEnvelope::from_value(json!({ "success": false, "response": "x" }));
        assert_eq!(failed.into_payload(), None);

        let truthy = AgentEnvelope::from_value(json!({ "success": "true", "response": "x" }));
        assert_eq!(truthy.into_payload(), None);

        assert!(!AgentEnvelope::from_value(json!([1, 2])).success);
    }
}
