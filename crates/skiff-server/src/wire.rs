// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Request/response bodies for the HTTP surface.
//!
//! Field names follow the front-end's camelCase convention; snake_case
//! aliases are accepted on input where older clients still send them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use skiff_core::{GuardrailsRules, ResponseStatus};
use skiff_model::{ActionInput, ForwardedParameters, Message};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionInput>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub extensions: Option<Value>,
    #[serde(default)]
    pub agent_session: Option<AgentSessionInput>,
    #[serde(default)]
    pub forwarded_parameters: Option<ForwardedParameters>,
    #[serde(default)]
    pub cloud: Option<CloudInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionInput {
    pub agent_name: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudInput {
    #[serde(default)]
    pub guardrails: Option<GuardrailsInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardrailsInput {
    #[serde(default)]
    pub input_validation_rules: GuardrailsRules,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponseBody {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<Message>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
    pub status: ResponseStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionExecuteRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecuteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecideRequest {
    pub approval_id: String,
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
