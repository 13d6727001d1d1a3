// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Opaque identifier generation for messages, tool calls, and runs.

/// Fresh opaque id.  Callers must never parse these.
pub fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id of the result message bound to an action execution.
///
/// Clients correlate a `result` message to its tool call through
/// `actionExecutionId`; the `result-` prefix only keeps the two ids distinct
/// in flat message lists.
pub fn result_message_id(action_execution_id: &str) -> String {
    format!("result-{action_execution_id}")
}
