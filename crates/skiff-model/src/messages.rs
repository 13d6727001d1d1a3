// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::random_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
    Tool,
}

/// A single conversation message, tagged by `type` on the wire.
///
/// Exactly one variant is active per message.  `ActionExecution.id` doubles as
/// the provider-side `tool_call_id`; a `Result` references it through
/// `action_execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Text {
        id: String,
        role: Role,
        content: String,
        #[serde(
            rename = "parentMessageId",
            alias = "parent_message_id",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        parent_id: Option<String>,
    },
    ActionExecution {
        id: String,
        name: String,
        /// Either a JSON object or a raw JSON-encoded string, as sent by the
        /// client.  Normalized to an object by [`Message::arguments_object`].
        #[serde(default)]
        arguments: Value,
        #[serde(
            rename = "parentMessageId",
            alias = "parent_message_id",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        parent_id: Option<String>,
    },
    Result {
        id: String,
        #[serde(rename = "actionExecutionId", alias = "action_execution_id")]
        action_execution_id: String,
        #[serde(rename = "actionName", alias = "action_name", default)]
        action_name: String,
        result: String,
    },
    AgentState {
        id: String,
        #[serde(rename = "threadId", alias = "thread_id")]
        thread_id: String,
        #[serde(rename = "agentName", alias = "agent_name")]
        agent_name: String,
        #[serde(rename = "nodeName", alias = "node_name", default)]
        node_name: String,
        #[serde(rename = "runId", alias = "run_id", default)]
        run_id: String,
        active: bool,
        running: bool,
        #[serde(default)]
        state: Value,
    },
    Image {
        id: String,
        role: Role,
        /// Image format, e.g. `png` or `jpeg`.
        format: String,
        /// Raw base64 payload (no `data:` prefix).
        bytes: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::Text {
            id: random_id(),
            role: Role::User,
            content: content.into(),
            parent_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Text {
            id: random_id(),
            role: Role::Assistant,
            content: content.into(),
            parent_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::Text {
            id: random_id(),
            role: Role::System,
            content: content.into(),
            parent_id: None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. }
            | Self::ActionExecution { id, .. }
            | Self::Result { id, .. }
            | Self::AgentState { id, .. }
            | Self::Image { id, .. } => id,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    pub fn is_action_execution(&self) -> bool {
        matches!(self, Self::ActionExecution { .. })
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    /// Plain text content for `Text` messages, `None` otherwise.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Tool-call arguments normalized to a JSON object.
    ///
    /// Clients may send the arguments either as an object or as a JSON-encoded
    /// string; non-JSON strings come back as an empty object.
    pub fn arguments_object(&self) -> Option<Value> {
        match self {
            Self::ActionExecution { arguments, .. } => match arguments {
                Value::String(s) => {
                    Some(serde_json::from_str(s).unwrap_or(Value::Object(Default::default())))
                }
                Value::Null => Some(Value::Object(Default::default())),
                other => Some(other.clone()),
            },
            _ => None,
        }
    }
}

// ─── Result encoding ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Encode an action result for the `Result.result` field.
///
/// A plain success passes through unchanged; an error wraps the payload as
/// `{"error": {code, message}, "result": <string>}` so the client can render
/// both the failure and any partial output.
pub fn encode_result(result: &str, error: Option<&ErrorDetail>) -> String {
    match error {
        None => result.to_string(),
        Some(e) => serde_json::json!({ "error": e, "result": result }).to_string(),
    }
}

/// Reverse of [`encode_result`].  Non-JSON strings pass through as plain
/// results; JSON objects without an `error` key do too.
pub fn decode_result(encoded: &str) -> (String, Option<ErrorDetail>) {
    let Ok(v) = serde_json::from_str::<Value>(encoded) else {
        return (encoded.to_string(), None);
    };
    let Some(obj) = v.as_object() else {
        return (encoded.to_string(), None);
    };
    let Some(err) = obj.get("error") else {
        return (encoded.to_string(), None);
    };
    let detail: Option<ErrorDetail> = serde_json::from_value(err.clone()).ok();
    let result = obj
        .get("result")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    match detail {
        Some(d) => (result, Some(d)),
        None => (encoded.to_string(), None),
    }
}

// ─── Allow-list filter ────────────────────────────────────────────────────────

/// Drop `Result` messages whose `action_execution_id` does not match an
/// `ActionExecution` earlier in the list.
///
/// Providers reject a `tool`-role message that is not preceded by a matching
/// `tool_calls` entry, so orphans must never reach the wire.  Each execution
/// id is consumed by its first matching result; duplicate results for the
/// same call are dropped too.
pub fn filter_orphan_results(messages: Vec<Message>) -> Vec<Message> {
    let mut valid_ids: std::collections::HashSet<&str> = messages
        .iter()
        .filter(|m| m.is_action_execution())
        .map(|m| m.id())
        .collect();

    let mut keep = vec![false; messages.len()];
    for (i, m) in messages.iter().enumerate() {
        match m {
            Message::Result {
                action_execution_id,
                ..
            } => {
                if valid_ids.remove(action_execution_id.as_str()) {
                    keep[i] = true;
                }
            }
            _ => keep[i] = true,
        }
    }

    let mut keep_iter = keep.into_iter();
    messages
        .into_iter()
        .filter(|_| keep_iter.next().unwrap_or(false))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
