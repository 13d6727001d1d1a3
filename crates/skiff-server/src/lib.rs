// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP surface: axum router, SSE framing, and wire DTOs.

mod routes;
pub mod sse;
pub mod wire;

pub use routes::{router, AppState, VERSION};

use tracing::info;

/// Serve the API on an already-bound listener.
///
/// Binding stays with the caller so the binary can distinguish a bind
/// failure (its own exit code) from runtime errors.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
