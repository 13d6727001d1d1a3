// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat completion adapter.
//!
//! DeepSeek, OpenAI, and most self-hosted inference servers speak the same
//! `/chat/completions` SSE streaming wire format.  One adapter serves them
//! all, configured with provider-specific defaults (URL, model, temperature
//! clamp range).
//!
//! # Usage
//! Configure via `skiff_config::ProviderConfig` and call
//! `skiff_model::from_config`, or use the [`OpenAICompatAdapter::deepseek`] /
//! [`OpenAICompatAdapter::openai`] constructors directly.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    actions::{action_parameters_schema, ActionInput},
    adapter::{
        AdapterRequest, ChunkStream, ForwardedParameters, ProviderAdapter, StreamChunk,
        ToolCallDelta, ToolChoice,
    },
    budget::trim_to_budget,
    messages::{filter_orphan_results, Message, Role},
};

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
const DEEPSEEK_DEFAULT_MODEL: &str = "deepseek-chat";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI-compatible streaming chat adapter.
pub struct OpenAICompatAdapter {
    /// Provider id returned by `provider_name()`.
    driver_name: &'static str,
    /// Model id forwarded to the API unless the request overrides it.
    model: String,
    api_key: String,
    /// Full chat completions URL, e.g. `https://api.deepseek.com/v1/chat/completions`.
    chat_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    /// Documented temperature range; forwarded values are clamped into it.
    temperature_range: (f32, f32),
    /// Approximate prompt-token budget.  `None` disables trimming.
    prompt_token_budget: Option<usize>,
    disable_parallel_tool_calls: bool,
    client: reqwest::Client,
    /// Additional HTTP headers sent on every request.
    extra_headers: Vec<(String, String)>,
}

impl OpenAICompatAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: String,
        base_url: &str,
        temperature_range: (f32, f32),
        cfg: &skiff_config::ProviderConfig,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            temperature_range,
            prompt_token_budget: cfg.prompt_token_budget,
            disable_parallel_tool_calls: cfg.disable_parallel_tool_calls,
            client: reqwest::Client::new(),
            extra_headers: cfg.extra_headers.clone(),
        }
    }

    /// DeepSeek defaults.  The documented temperature range is [0.1, 2.0].
    pub fn deepseek(api_key: String, cfg: &skiff_config::ProviderConfig) -> Self {
        let model = non_empty_or(&cfg.model, DEEPSEEK_DEFAULT_MODEL);
        let base = cfg.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
        Self::new("deepseek", model, api_key, base, (0.1, 2.0), cfg)
    }

    /// OpenAI defaults; temperature range [0.0, 2.0].
    pub fn openai(api_key: String, cfg: &skiff_config::ProviderConfig) -> Self {
        let model = non_empty_or(&cfg.model, OPENAI_DEFAULT_MODEL);
        let base = cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Self::new("openai", model, api_key, base, (0.0, 2.0), cfg)
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAICompatAdapter {
    fn provider_name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn process(&self, req: AdapterRequest) -> anyhow::Result<ChunkStream> {
        let model = req
            .model
            .clone()
            .or_else(|| {
                req.forwarded_parameters
                    .as_ref()
                    .and_then(|fp| fp.model.clone())
            })
            .unwrap_or_else(|| self.model.clone());

        let body = build_request_body(
            &model,
            req.messages,
            &req.actions,
            req.forwarded_parameters.as_ref(),
            self.temperature,
            self.temperature_range,
            self.max_tokens,
            self.disable_parallel_tool_calls,
            self.prompt_token_budget,
        );

        debug!(
            driver = %self.driver_name,
            model = %model,
            action_count = req.actions.len(),
            "sending completion request"
        );
        tracing::trace!(request_body = ?body, "full completion request");

        let mut http_req = self
            .client
            .post(&self.chat_url)
            .json(&body)
            .bearer_auth(&self.api_key);
        for (name, val) in &self.extra_headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }

        let resp = http_req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(500).collect();
            bail!("{} error {status}: {excerpt}", self.driver_name);
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let chunk_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let chunks: Vec<anyhow::Result<StreamChunk>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(chunk_stream))
    }
}

// ─── Request payload ──────────────────────────────────────────────────────────

/// Build the full `/chat/completions` request body.
///
/// Extracted as a free function so the wire format can be unit-tested without
/// making HTTP requests.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_request_body(
    model: &str,
    messages: Vec<Message>,
    actions: &[ActionInput],
    forwarded: Option<&ForwardedParameters>,
    default_temperature: Option<f32>,
    temperature_range: (f32, f32),
    default_max_tokens: Option<u32>,
    disable_parallel_tool_calls: bool,
    prompt_token_budget: Option<usize>,
) -> Value {
    let tools: Vec<Value> = actions.iter().map(action_to_tool).collect();
    let tools_tokens = serde_json::to_string(&tools)
        .map(|s| s.len() / 3)
        .unwrap_or(0);

    let messages = filter_orphan_results(messages);
    let messages = match prompt_token_budget {
        Some(budget) => trim_to_budget(messages, tools_tokens, budget),
        None => messages,
    };
    let wire_messages: Vec<Value> = messages.iter().filter_map(build_wire_message).collect();

    let mut body = json!({
        "model": model,
        "stream": true,
        "messages": wire_messages,
    });

    if !tools.is_empty() {
        body["tools"] = json!(tools);
        if let Some(choice) = forwarded.and_then(|fp| {
            tool_choice_value(fp.tool_choice.as_ref(), fp.tool_choice_function_name.as_deref())
        }) {
            body["tool_choice"] = choice;
        }
        let parallel = forwarded.and_then(|fp| fp.parallel_tool_calls);
        if disable_parallel_tool_calls || parallel == Some(false) {
            body["parallel_tool_calls"] = json!(false);
        }
    }

    if let Some(max_tokens) = forwarded.and_then(|fp| fp.max_tokens).or(default_max_tokens) {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(stop) = forwarded.and_then(|fp| fp.stop.as_ref()) {
        body["stop"] = json!(stop);
    }
    if let Some(t) = forwarded.and_then(|fp| fp.temperature).or(default_temperature) {
        body["temperature"] = json!(t.clamp(temperature_range.0, temperature_range.1));
    }

    body
}

/// Map one runtime message to its provider wire form.  `AgentState` messages
/// are client-facing and never sent to the provider.
fn build_wire_message(m: &Message) -> Option<Value> {
    match m {
        Message::Text { role, content, .. } => Some(json!({
            "role": role_str(fix_developer_role(*role)),
            "content": content,
        })),
        Message::ActionExecution {
            id,
            name,
            ..
        } => {
            let args = m
                .arguments_object()
                .unwrap_or_else(|| Value::Object(Default::default()));
            Some(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": args.to_string(),
                    }
                }]
            }))
        }
        Message::Result {
            action_execution_id,
            result,
            ..
        } => Some(json!({
            "role": "tool",
            "tool_call_id": action_execution_id,
            "content": result,
        })),
        Message::Image {
            role,
            format,
            bytes,
            ..
        } => Some(json!({
            "role": role_str(fix_developer_role(*role)),
            "content": [{
                "type": "image_url",
                "image_url": { "url": format!("data:image/{format};base64,{bytes}") },
            }],
        })),
        Message::AgentState { .. } => None,
    }
}

/// DeepSeek (and several other providers) reject the `developer` role; it is
/// semantically a `system` message.
pub(crate) fn fix_developer_role(role: Role) -> Role {
    if role == Role::Developer {
        Role::System
    } else {
        role
    }
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::Developer => "developer",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn action_to_tool(a: &ActionInput) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": a.name,
            "description": a.description,
            "parameters": action_parameters_schema(&a.parameters),
        }
    })
}

fn tool_choice_value(
    choice: Option<&ToolChoice>,
    function_name: Option<&str>,
) -> Option<Value> {
    match choice? {
        ToolChoice::Mode(mode) if mode == "function" => {
            let name = function_name?;
            Some(json!({ "type": "function", "function": { "name": name } }))
        }
        ToolChoice::Mode(mode) => Some(json!(mode)),
        ToolChoice::Schema(v) => Some(v.clone()),
    }
}

// ─── Chunk decoding ───────────────────────────────────────────────────────────

/// Parse a single complete SSE `data:` line into a [`StreamChunk`].
///
/// Returns `None` for empty lines, comment lines, the `[DONE]` sentinel
/// (the HTTP stream ends right after it), and unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<StreamChunk>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "skipping unparseable SSE chunk");
            return None;
        }
    };
    parse_chunk(&v).map(Ok)
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line (bytes not yet terminated by `\n`) is left
/// in `buf` so it can be extended by the next TCP chunk.  This is necessary
/// because a single SSE event may be split across multiple TCP packets.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<StreamChunk>> {
    let mut chunks = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        // Advance buffer past the consumed line including the \n.
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(chunk) = parse_sse_data_line(&line) {
            chunks.push(chunk);
        }
    }
    chunks
}

/// Decode one provider chunk JSON object.  A chunk with an empty delta is
/// ignored (returns `None`).
pub(crate) fn parse_chunk(v: &Value) -> Option<StreamChunk> {
    let choice = v.get("choices")?.get(0)?;
    let id = v["id"].as_str().unwrap_or_default().to_string();
    let finish_reason = choice["finish_reason"]
        .as_str()
        .map(|s| s.to_string());

    let delta = &choice["delta"];

    let tool_call = delta.get("tool_calls").and_then(|tcs| tcs.get(0)).map(|tc| {
        ToolCallDelta {
            id: non_empty_str(&tc["id"]),
            name: non_empty_str(&tc["function"]["name"]),
            arguments: tc["function"]["arguments"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        }
    });

    let text_delta = delta
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    if text_delta.is_none() && tool_call.is_none() && finish_reason.is_none() {
        return None;
    }

    Some(StreamChunk {
        id,
        text_delta,
        tool_call,
        finish_reason,
    })
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
