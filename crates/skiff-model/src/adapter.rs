// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActionInput, Message};

/// One decoded increment of a provider's streaming response.
///
/// This is the tuple the event pipeline's state machine consumes: at most one
/// of `text_delta` / `tool_call` is meaningful per chunk, and `finish_reason`
/// terminates the chunk loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Provider chunk id; reused as the message id / parent id downstream.
    pub id: String,
    pub text_delta: Option<String>,
    pub tool_call: Option<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Set (non-empty) only on the chunk that opens a tool call.
    pub id: Option<String>,
    pub name: Option<String>,
    /// Incremental JSON fragment of the arguments.
    pub arguments: Option<String>,
}

impl StreamChunk {
    pub fn text(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text_delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn tool_start(
        id: impl Into<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_call: Some(ToolCallDelta {
                id: Some(call_id.into()),
                name: Some(name.into()),
                arguments: None,
            }),
            ..Default::default()
        }
    }

    pub fn tool_args(id: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_call: Some(ToolCallDelta {
                id: None,
                name: None,
                arguments: Some(args.into()),
            }),
            ..Default::default()
        }
    }

    pub fn finish(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            finish_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// True when this chunk opens a new tool call (carries a non-empty id).
    pub fn opens_tool_call(&self) -> bool {
        self.tool_call
            .as_ref()
            .and_then(|t| t.id.as_deref())
            .is_some_and(|id| !id.is_empty())
    }
}

/// A finite stream of decoded provider chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// Per-request parameter overrides forwarded from the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ForwardedParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice_function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

/// `tool_choice` is either one of the mode strings (`"auto"`, `"none"`,
/// `"function"`) or a provider-native object passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Schema(Value),
}

/// Everything an adapter needs to open one streaming completion.
#[derive(Debug, Clone, Default)]
pub struct AdapterRequest {
    pub messages: Vec<Message>,
    pub actions: Vec<ActionInput>,
    pub thread_id: Option<String>,
    pub model: Option<String>,
    pub forwarded_parameters: Option<ForwardedParameters>,
}

/// Translates the runtime's abstract messages and actions into one concrete
/// provider API and streams decoded chunks back.
///
/// Retries are the caller's responsibility; an adapter reports mid-stream
/// failures as `Err` items and pre-stream failures by returning `Err` from
/// [`ProviderAdapter::process`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider id for status display, e.g. `"deepseek"`.
    fn provider_name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_function_calling(&self) -> bool {
        true
    }

    /// Translate the request into the provider payload, open the streaming
    /// call, and return the decoded chunk stream.
    async fn process(&self, req: AdapterRequest) -> anyhow::Result<ChunkStream>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
