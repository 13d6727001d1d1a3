// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pre-flight input validation against the cloud guardrails endpoint.
//!
//! The runtime only invokes the endpoint and enforces its verdict; rule
//! authoring lives elsewhere.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use skiff_model::{Message, Role};

/// Topic rules forwarded from the request's `cloud.guardrails` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailsRules {
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailsVerdict {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl GuardrailsVerdict {
    pub fn is_denied(&self) -> bool {
        self.status == "denied"
    }
}

/// Build the `/guardrails/validate` request body.
///
/// Only user/assistant text turns participate; the newest message must be a
/// user turn (it is the input under validation, the rest are context).
pub fn build_validate_body(rules: &GuardrailsRules, messages: &[Message]) -> anyhow::Result<Value> {
    let mut dialog: Vec<Value> = Vec::new();
    for m in messages {
        if let Message::Text { role, content, .. } = m {
            if matches!(role, Role::User | Role::Assistant) {
                dialog.push(json!({
                    "role": if *role == Role::User { "user" } else { "assistant" },
                    "content": content,
                }));
            }
        }
    }

    let Some(last) = dialog.pop() else {
        bail!("no user or assistant messages to validate");
    };
    if last["role"] != "user" {
        bail!("last message is not from the user");
    }

    Ok(json!({
        "input": last["content"],
        "validTopics": rules.allow_list,
        "invalidTopics": rules.deny_list,
        "messages": dialog,
    }))
}

pub struct GuardrailsClient {
    base_url: String,
    client: reqwest::Client,
}

impl GuardrailsClient {
    /// `COPILOT_CLOUD_BASE_URL` overrides the configured base URL.
    pub fn new(configured_base_url: &str) -> Self {
        let base_url = std::env::var("COPILOT_CLOUD_BASE_URL")
            .unwrap_or_else(|_| configured_base_url.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn validate(
        &self,
        public_api_key: &str,
        rules: &GuardrailsRules,
        messages: &[Message],
    ) -> anyhow::Result<GuardrailsVerdict> {
        let body = build_validate_body(rules, messages)?;
        let resp = self
            .client
            .post(format!("{}/guardrails/validate", self.base_url))
            .header("Content-Type", "application/json")
            .header("X-CopilotCloud-Public-API-Key", public_api_key)
            .json(&body)
            .send()
            .await
            .context("guardrails request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("guardrails validation failed ({status}): {text}");
        }
        resp.json::<GuardrailsVerdict>()
            .await
            .context("decoding guardrails verdict")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
