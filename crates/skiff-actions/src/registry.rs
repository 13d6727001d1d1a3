// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use skiff_model::ActionInput;

use crate::Action;

/// Central registry holding the runtime's server-side actions.
///
/// Immutable after construction; all lookups take `&self` so the registry can
/// be shared across concurrent requests behind an `Arc`.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(&mut self, action: Action) {
        self.actions.insert(action.name.clone(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Wire-facing descriptors for all registered actions, sorted by name.
    pub fn descriptors(&self) -> Vec<ActionInput> {
        let mut descriptors: Vec<ActionInput> =
            self.actions.values().map(|a| a.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered actions, sorted by name.
    pub fn all(&self) -> Vec<Arc<Action>> {
        let mut actions: Vec<Arc<Action>> = self.actions.values().cloned().collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        actions
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
