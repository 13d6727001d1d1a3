// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

/// Per-request correlation state shared by middleware and the orchestrator.
///
/// `thread_id` is the opaque key tying together approvals, rate limiting, and
/// the output-messages promise for one logical conversation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub thread_id: String,
    pub run_id: String,
    /// Free-form properties: `api_key` from the transport layer, anything a
    /// before-hook wants to hand to later hooks.
    pub properties: HashMap<String, Value>,
    pub url: Option<String>,
    pub request_start: Instant,
}

impl RequestContext {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            properties: HashMap::new(),
            url: None,
            request_start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.request_start.elapsed().as_millis() as u64
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}
