//! Widget WebSocket protocol types (connect, submit, events, etc.).

use crate::agents::{AgentKey, AgentProfile};
use crate::conversation::{Feedback, MessageId, WidgetEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Wire event: `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub typ: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl From<WidgetEvent> for WsEvent {
    fn from(event: WidgetEvent) -> Self {
        let (name, payload) = match event {
            WidgetEvent::MessagesChanged(agent) => ("messages.changed", json!({ "agent": agent })),
            WidgetEvent::LoadingChanged(agent, loading) => {
                ("loading.changed", json!({ "agent": agent, "loading": loading }))
            }
            WidgetEvent::SuggestionsChanged(agent) => {
                ("suggestions.changed", json!({ "agent": agent }))
            }
            WidgetEvent::ActiveChanged(agent) => ("active.changed", json!({ "agent": agent })),
            WidgetEvent::Reset => ("reset", json!({})),
        };
        Self {
            typ: "event".to_string(),
            event: name.to_string(),
            payload,
        }
    }
}

/// Client connect params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: Option<u32>,
    pub max_protocol: Option<u32>,
    #[serde(default)]
    pub client: ConnectClient,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClient {
    pub id: Option<String>,
    pub version: Option<String>,
}

/// Server hello-ok payload after successful connect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub typ: String,
    pub protocol: u32,
    pub agents: Vec<AgentProfile>,
    pub active: AgentKey,
}

/// Params for "activate": switch the displayed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateParams {
    pub agent: String,
}

/// Params for "submit": send a message. Agent defaults to the active one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    pub agent: Option<String>,
    pub message: String,
}

/// Params for "feedback": toggle a rating on an agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackParams {
    pub agent: String,
    pub message_id: MessageId,
    pub value: Feedback,
}

/// Params for "snapshot". Agent defaults to the active one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotParams {
    #[serde(default)]
    pub agent: Option<String>,
}
