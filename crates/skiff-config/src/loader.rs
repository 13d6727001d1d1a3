// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Layered configuration loading.
//!
//! Configuration is assembled from up to five layers, lowest priority first:
//! a system file, the user's XDG config, a workspace-local `skiff.yaml`, the
//! file named by `SKIFF_CONFIG`, and an explicit `--config` path.  Scalars
//! from higher layers win.  Two kinds of fields get special treatment:
//!
//! - **Accumulating lists** (`approval.required`, `middleware.api_keys`):
//!   entries from every layer are unioned instead of replaced, so a
//!   system-wide gate list cannot be silently dropped by a workspace file.
//! - **String values** pass through environment expansion (`$VAR` /
//!   `${VAR}`), so secrets can be referenced instead of inlined.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::Value;
use tracing::debug;

use crate::Config;

/// Dotted key paths whose sequence values accumulate across layers rather
/// than being replaced.  Deny-by-default lists must only ever grow.
const ACCUMULATING_LISTS: &[&str] = &["approval.required", "middleware.api_keys"];

/// Load configuration, optionally with an explicit top-priority file.
///
/// A missing search-path layer is skipped silently; a missing explicit file
/// (flag or `SKIFF_CONFIG`) is an error, since the operator asked for it.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = Value::Null;

    for path in search_paths() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "applying config layer");
        merged = fold_layer(merged, read_layer(&path)?, "");
    }

    let mut explicit: Vec<PathBuf> = Vec::new();
    if let Ok(env_path) = std::env::var("SKIFF_CONFIG") {
        explicit.push(PathBuf::from(env_path));
    }
    if let Some(p) = extra {
        explicit.push(p.to_path_buf());
    }
    for path in explicit {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        debug!(path = %expanded, "applying explicit config layer");
        merged = fold_layer(merged, read_layer(Path::new(&expanded))?, "");
    }

    if merged.is_null() {
        return Ok(Config::default());
    }
    serde_yaml::from_value(merged).context("config did not match the expected schema")
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/skiff/config.yaml")];
    if let Some(cfg_dir) = dirs::config_dir() {
        paths.push(cfg_dir.join("skiff/config.yaml"));
    }
    paths.push(PathBuf::from("skiff.yaml"));
    paths
}

fn read_layer(path: &Path) -> anyhow::Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(expand_strings(value))
}

/// Combine one layer into the accumulator.  `key_path` is the dotted path of
/// the node being merged, used to recognize accumulating lists.
fn fold_layer(base: Value, layer: Value, key_path: &str) -> Value {
    match (base, layer) {
        (Value::Mapping(mut base_map), Value::Mapping(layer_map)) => {
            for (key, layer_val) in layer_map {
                let child_path = match key.as_str() {
                    Some(name) if key_path.is_empty() => name.to_string(),
                    Some(name) => format!("{key_path}.{name}"),
                    None => key_path.to_string(),
                };
                let combined = match base_map.remove(&key) {
                    Some(base_val) => fold_layer(base_val, layer_val, &child_path),
                    None => layer_val,
                };
                base_map.insert(key, combined);
            }
            Value::Mapping(base_map)
        }
        (Value::Sequence(mut base_seq), Value::Sequence(layer_seq))
            if ACCUMULATING_LISTS.contains(&key_path) =>
        {
            for item in layer_seq {
                if !base_seq.contains(&item) {
                    base_seq.push(item);
                }
            }
            Value::Sequence(base_seq)
        }
        // Everything else: the higher layer wins outright.
        (_, layer) => layer,
    }
}

/// Expand `$VAR` / `${VAR}` in every string scalar.  Unset variables leave
/// the reference untouched so the schema error points at the real problem.
fn expand_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let expanded = shellexpand::env_with_context_no_errors(&s, |var| {
                std::env::var(var).ok()
            });
            Value::String(expanded.into_owned())
        }
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, expand_strings(v)))
                .collect(),
        ),
        Value::Sequence(seq) => {
            Value::Sequence(seq.into_iter().map(expand_strings).collect())
        }
        other => other,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
