// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

/// Events emitted by the runtime during a single request.
///
/// The sequence is total-ordered within one request.  `TextMessage*` and
/// `ActionExecution*` events form balanced groups: a `Start` is always
/// followed by a matching `End` with no second group of the same kind opened
/// in between.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    TextMessageStart {
        message_id: String,
        parent_message_id: Option<String>,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        message_id: String,
    },
    ActionExecutionStart {
        action_execution_id: String,
        action_name: String,
        parent_message_id: Option<String>,
    },
    ActionExecutionArgs {
        action_execution_id: String,
        args: String,
    },
    ActionExecutionEnd {
        action_execution_id: String,
    },
    ActionExecutionResult {
        action_execution_id: String,
        action_name: String,
        result: String,
    },
    AgentStateMessage {
        thread_id: String,
        agent_name: String,
        node_name: String,
        run_id: String,
        active: bool,
        running: bool,
        state: Value,
    },
    Meta {
        name: String,
        data: Value,
    },
    Error {
        code: String,
        message: String,
    },
}

/// A finite, ordered stream of runtime events (remote agents, fan-in).
pub type EventStream = Pin<Box<dyn Stream<Item = RuntimeEvent> + Send>>;
