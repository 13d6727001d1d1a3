// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Projection of internal runtime events onto SSE frames.
//!
//! Frame grammar: `[ "event: " name "\n" ] "data: " json "\n\n"`, terminated
//! by `data: [DONE]\n\n`.  Each internal event maps to exactly one frame.

use serde_json::{json, Value};

use skiff_core::ResponseStatus;
use skiff_model::{ids::result_message_id, random_id, RuntimeEvent};

/// One outgoing SSE frame: the `event:` name and the `data:` JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: &'static str,
    pub data: Value,
}

impl Frame {
    /// Render as raw wire bytes (used by tests; the axum layer builds
    /// `axum::response::sse::Event`s from the same fields).
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

pub fn session_start_frame(thread_id: &str, run_id: &str) -> Frame {
    Frame {
        event: "session_start",
        data: json!({ "threadId": thread_id, "runId": run_id }),
    }
}

pub fn response_end_frame(status: &ResponseStatus) -> Frame {
    let mut data = json!({ "status": status.code.as_str() });
    if let Some(reason) = &status.reason {
        data["reason"] = json!(reason);
    }
    Frame {
        event: "response_end",
        data,
    }
}

/// The terminal sentinel; its data line is the literal `[DONE]`, not JSON.
pub const DONE_SENTINEL: &str = "[DONE]";

/// `thread_id` is the stream's correlation key; it appears on frames whose
/// wire shape carries a `threadId` so a client can still attribute a frame
/// after losing local stream state.
pub fn frame_for(event: &RuntimeEvent, thread_id: &str) -> Frame {
    let now = chrono::Utc::now().to_rfc3339();
    match event {
        RuntimeEvent::TextMessageStart {
            message_id,
            parent_message_id,
        } => Frame {
            event: "text_message_start",
            data: json!({
                "id": message_id,
                "parentMessageId": parent_message_id,
                "role": "assistant",
                "createdAt": now,
                "type": "text",
            }),
        },
        RuntimeEvent::TextMessageContent { message_id, delta } => Frame {
            event: "text_message_content",
            data: json!({ "id": message_id, "content": delta }),
        },
        RuntimeEvent::TextMessageEnd { message_id } => Frame {
            event: "text_message_end",
            data: json!({ "id": message_id, "status": "success" }),
        },
        RuntimeEvent::ActionExecutionStart {
            action_execution_id,
            action_name,
            parent_message_id,
        } => Frame {
            event: "action_execution_start",
            data: json!({
                "id": action_execution_id,
                "parentMessageId": parent_message_id,
                "name": action_name,
                "createdAt": now,
                "type": "action_execution",
            }),
        },
        RuntimeEvent::ActionExecutionArgs {
            action_execution_id,
            args,
        } => Frame {
            event: "action_execution_args",
            data: json!({ "actionExecutionId": action_execution_id, "args": args }),
        },
        RuntimeEvent::ActionExecutionEnd {
            action_execution_id,
        } => Frame {
            event: "action_execution_end",
            data: json!({ "actionExecutionId": action_execution_id, "status": "success" }),
        },
        RuntimeEvent::ActionExecutionResult {
            action_execution_id,
            action_name,
            result,
        } => Frame {
            event: "action_execution_result",
            data: json!({
                "id": result_message_id(action_execution_id),
                "actionExecutionId": action_execution_id,
                "actionName": action_name,
                "result": result,
                "createdAt": now,
                "type": "result",
            }),
        },
        RuntimeEvent::AgentStateMessage {
            thread_id,
            agent_name,
            node_name,
            run_id,
            active,
            running,
            state,
        } => Frame {
            event: "agent_state_message",
            data: json!({
                "id": random_id(),
                "threadId": thread_id,
                "agentName": agent_name,
                "nodeName": node_name,
                "runId": run_id,
                "active": active,
                "state": state,
                "running": running,
                "role": "assistant",
                "createdAt": now,
                "type": "agent_state",
            }),
        },
        RuntimeEvent::Meta { name, data } => Frame {
            event: "meta_event",
            data: json!({ "type": "meta_event", "name": name, "data": data }),
        },
        RuntimeEvent::Error { code, message } => {
            // The internal code is for logs; the wire shape is {error, threadId}.
            tracing::debug!(code = %code, "projecting error event");
            Frame {
                event: "error",
                data: json!({ "error": message, "threadId": thread_id }),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
