// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Data model and provider adapters.
//!
//! This crate is the leaf of the workspace: tagged message and event types,
//! action descriptors, result encoding, and the [`ProviderAdapter`] trait with
//! the OpenAI-compatible reference implementation (DeepSeek defaults).

pub mod actions;
pub mod adapter;
pub mod budget;
pub mod events;
pub mod ids;
pub mod messages;
pub mod mock;
pub mod openai_compat;

pub use actions::{ActionAvailability, ActionInput, Parameter, ParameterType};
pub use adapter::{
    AdapterRequest, ChunkStream, ForwardedParameters, ProviderAdapter, StreamChunk, ToolCallDelta,
    ToolChoice,
};
pub use events::{EventStream, RuntimeEvent};
pub use ids::random_id;
pub use messages::{
    decode_result, encode_result, filter_orphan_results, ErrorDetail, Message, Role,
};
pub use openai_compat::OpenAICompatAdapter;

use std::sync::Arc;

/// Test-only shims for integration tests that need the crate-private
/// request-body builder with fixed DeepSeek defaults.
#[doc(hidden)]
pub mod testing {
    use serde_json::Value;

    use crate::{ActionInput, ForwardedParameters, Message};

    pub fn build_request_body_for_tests(
        messages: Vec<Message>,
        actions: &[ActionInput],
        forwarded: Option<&ForwardedParameters>,
    ) -> Value {
        crate::openai_compat::build_request_body(
            "deepseek-chat",
            messages,
            actions,
            forwarded,
            None,
            (0.1, 2.0),
            None,
            false,
            None,
        )
    }
}

/// Construct a provider adapter from configuration.
///
/// `api_key` resolution order: explicit config value, then the configured
/// `api_key_env` variable, then the provider's canonical environment variable
/// (`DEEPSEEK_API_KEY`, `OPENAI_API_KEY`).  Hosted providers with no key at
/// all are rejected so the failure happens at startup, not mid-request.
pub fn from_config(
    cfg: &skiff_config::ProviderConfig,
) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
    let resolved_key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "deepseek" => {
            let key = resolved_key
                .ok_or_else(|| anyhow::anyhow!("missing API key: set DEEPSEEK_API_KEY"))?;
            Ok(Arc::new(OpenAICompatAdapter::deepseek(key, cfg)))
        }
        "openai" => {
            let key = resolved_key
                .ok_or_else(|| anyhow::anyhow!("missing API key: set OPENAI_API_KEY"))?;
            Ok(Arc::new(OpenAICompatAdapter::openai(key, cfg)))
        }
        "mock" => Ok(Arc::new(mock::ScriptedMockAdapter::echo())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

fn resolve_api_key(cfg: &skiff_config::ProviderConfig) -> Option<String> {
    if let Some(key) = &cfg.api_key {
        return Some(key.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        if let Ok(v) = std::env::var(var) {
            return Some(v);
        }
    }
    let canonical = match cfg.provider.as_str() {
        "deepseek" => "DEEPSEEK_API_KEY",
        "openai" => "OPENAI_API_KEY",
        _ => return None,
    };
    std::env::var(canonical).ok()
}
