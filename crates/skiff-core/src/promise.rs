// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use skiff_model::Message;

/// One-shot promise carrying the collated output messages of a request,
/// keyed by thread id.
///
/// At most one live entry per thread id: registering a thread that already
/// has a pending promise rejects the stale one first.  Resolution is
/// exactly-once — the sender is consumed by resolve/reject and later calls
/// for the same thread id are no-ops.
#[derive(Default)]
pub struct OutputMessages {
    slots: Mutex<HashMap<String, oneshot::Sender<Result<Vec<Message>, String>>>>,
}

impl OutputMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a promise for `thread_id` and return the awaitable half.
    pub fn register(
        &self,
        thread_id: &str,
    ) -> oneshot::Receiver<Result<Vec<Message>, String>> {
        let (tx, rx) = oneshot::channel();
        let stale = self
            .slots
            .lock()
            .expect("promise map poisoned")
            .insert(thread_id.to_string(), tx);
        if let Some(old) = stale {
            warn!(thread_id, "replacing unresolved output-messages promise");
            let _ = old.send(Err("superseded by a newer request".to_string()));
        }
        rx
    }

    pub fn resolve(&self, thread_id: &str, messages: Vec<Message>) {
        if let Some(tx) = self
            .slots
            .lock()
            .expect("promise map poisoned")
            .remove(thread_id)
        {
            let _ = tx.send(Ok(messages));
        }
    }

    pub fn reject(&self, thread_id: &str, error: impl Into<String>) {
        if let Some(tx) = self
            .slots
            .lock()
            .expect("promise map poisoned")
            .remove(thread_id)
        {
            let _ = tx.send(Err(error.into()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().expect("promise map poisoned").len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_messages() {
        let p = OutputMessages::new();
        let rx = p.register("th-1");
        p.resolve("th-1", vec![Message::assistant("done")]);
        let messages = rx.await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(p.pending_count(), 0);
    }

    #[tokio::test]
    async fn reject_delivers_error() {
        let p = OutputMessages::new();
        let rx = p.register("th-1");
        p.reject("th-1", "cancelled");
        assert_eq!(rx.await.unwrap().unwrap_err(), "cancelled");
    }

    #[tokio::test]
    async fn at_most_one_resolution() {
        let p = OutputMessages::new();
        let rx = p.register("th-1");
        p.resolve("th-1", vec![]);
        // Second resolution for the same thread id is a no-op.
        p.resolve("th-1", vec![Message::assistant("late")]);
        let messages = rx.await.unwrap().unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn resolving_unknown_thread_is_a_noop() {
        let p = OutputMessages::new();
        p.resolve("nope", vec![]);
        p.reject("nope", "x");
        assert_eq!(p.pending_count(), 0);
    }

    #[tokio::test]
    async fn reregistering_rejects_the_stale_promise() {
        let p = OutputMessages::new();
        let first = p.register("th-1");
        let second = p.register("th-1");
        assert!(first.await.unwrap().is_err(), "stale promise must reject");
        p.resolve("th-1", vec![]);
        assert!(second.await.unwrap().is_ok());
    }
}
