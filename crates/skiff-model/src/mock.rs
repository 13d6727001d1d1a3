// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::adapter::{AdapterRequest, ChunkStream, ProviderAdapter, StreamChunk};

/// A pre-scripted mock adapter.  Each call to `process` pops the next chunk
/// script from the front of the queue.  This lets tests specify exact chunk
/// sequences — including tool calls — without network access.
pub struct ScriptedMockAdapter {
    scripts: Arc<Mutex<Vec<Vec<StreamChunk>>>>,
    /// The last `AdapterRequest` seen by this adapter.
    /// Written on each `process()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<AdapterRequest>>>,
}

impl ScriptedMockAdapter {
    /// Build an adapter from a list of chunk scripts.  The outer `Vec` is the
    /// ordered list of calls; the inner `Vec` is the chunk sequence emitted
    /// for that call.
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Adapter that echoes the last user message as a single text chunk.
    /// Used by the `mock` provider config for offline smoke runs.
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    /// Convenience: a single call answering with the given text deltas.
    pub fn text_reply(deltas: &[&str]) -> Self {
        let mut chunks: Vec<StreamChunk> = deltas
            .iter()
            .map(|d| StreamChunk::text("chunk-1", *d))
            .collect();
        chunks.push(StreamChunk::finish("chunk-1", "stop"));
        Self::new(vec![chunks])
    }

    /// Convenience: a single call issuing one tool call with streamed args.
    pub fn tool_call(call_id: &str, name: &str, arg_deltas: &[&str]) -> Self {
        let mut chunks = vec![StreamChunk::tool_start("chunk-1", call_id, name)];
        chunks.extend(
            arg_deltas
                .iter()
                .map(|d| StreamChunk::tool_args("chunk-1", *d)),
        );
        chunks.push(StreamChunk::finish("chunk-1", "tool_calls"));
        Self::new(vec![chunks])
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedMockAdapter {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn process(&self, req: AdapterRequest) -> anyhow::Result<ChunkStream> {
        let echo_reply = req
            .messages
            .iter()
            .rev()
            .find_map(|m| m.text_content())
            .unwrap_or("[no input]")
            .to_string();
        *self.last_request.lock().unwrap() = Some(req);

        let chunks = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed: echo.
                vec![
                    StreamChunk::text("mock-1", format!("MOCK: {echo_reply}")),
                    StreamChunk::finish("mock-1", "stop"),
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<StreamChunk>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::Message;

    fn req() -> AdapterRequest {
        AdapterRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn echo_adapter_reflects_last_user_message() {
        let a = ScriptedMockAdapter::echo();
        let mut stream = a.process(req()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.text_delta.as_deref(), Some("MOCK: hi"));
    }

    #[tokio::test]
    async fn text_reply_ends_with_finish_reason() {
        let a = ScriptedMockAdapter::text_reply(&["Hi", " there!"]);
        let mut stream = a.process(req()).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(c) = stream.next().await {
            chunks.push(c.unwrap());
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn tool_call_script_opens_then_streams_args() {
        let a = ScriptedMockAdapter::tool_call("t1", "get_weather", &["{\"city\":", "\"SF\"}"]);
        let mut stream = a.process(req()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.opens_tool_call());
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(
            second.tool_call.unwrap().arguments.as_deref(),
            Some("{\"city\":")
        );
    }

    #[tokio::test]
    async fn last_request_is_recorded() {
        let a = ScriptedMockAdapter::text_reply(&["ok"]);
        let _ = a.process(req()).await.unwrap();
        assert!(a.last_request.lock().unwrap().is_some());
    }
}
