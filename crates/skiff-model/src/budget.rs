// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt-size enforcement for providers with small context windows.
//!
//! Token counts are approximated (length ÷ 3) — good enough for a safety
//! margin when no real tokenizer is available for the target model.

use crate::messages::Message;

/// Approximate token count of a text fragment.
pub fn approx_tokens(text: &str) -> usize {
    (text.len() / 3).max(1)
}

fn message_tokens(m: &Message) -> usize {
    match m {
        Message::Text { content, .. } => approx_tokens(content),
        Message::ActionExecution {
            name, arguments, ..
        } => approx_tokens(name) + approx_tokens(&arguments.to_string()),
        Message::Result { result, .. } => approx_tokens(result),
        Message::AgentState { state, .. } => approx_tokens(&state.to_string()),
        // Rough fixed cost per image; providers bill these per tile, not per
        // base64 byte.
        Message::Image { .. } => 765,
    }
}

fn is_system(m: &Message) -> bool {
    matches!(
        m,
        Message::Text {
            role: crate::Role::System | crate::Role::Developer,
            ..
        }
    )
}

/// Drop the oldest non-system messages until the list fits `budget` tokens.
///
/// Budget is reserved first for the serialized tools block and all system /
/// developer messages, which are always preserved.  Remaining messages are
/// admitted newest-first; the walk stops at the first message that would
/// overflow, so no older message can leapfrog a dropped one.  Relative order
/// of the kept messages is preserved.
pub fn trim_to_budget(messages: Vec<Message>, tools_tokens: usize, budget: usize) -> Vec<Message> {
    let system_tokens: usize = messages
        .iter()
        .filter(|m| is_system(m))
        .map(message_tokens)
        .sum();
    let mut remaining = budget.saturating_sub(tools_tokens + system_tokens);

    // Walk newest → oldest deciding which non-system messages fit.
    let mut keep = vec![false; messages.len()];
    for (i, m) in messages.iter().enumerate().rev() {
        if is_system(m) {
            keep[i] = true;
            continue;
        }
        let cost = message_tokens(m);
        if cost <= remaining {
            remaining -= cost;
            keep[i] = true;
        } else {
            break;
        }
    }

    let mut keep_iter = keep.into_iter();
    messages
        .into_iter()
        .filter(|_| keep_iter.next().unwrap_or(false))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
