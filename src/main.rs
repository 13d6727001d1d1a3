// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use skiff_actions::{decision_action, ActionRegistry, ApprovalManager, ApprovalStrategy};
use skiff_config::ApprovalStrategyConfig;
use skiff_core::{
    ApiKeyAuthMiddleware, GuardrailsClient, MetricsMiddleware, MiddlewareChain,
    RateLimitMiddleware, RequestLoggingMiddleware, Runtime,
};
use skiff_server::AppState;

// Exit codes: 1 = missing/invalid provider credentials, 2 = bind failure.
const EXIT_CONFIG: u8 = 1;
const EXIT_BIND: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match skiff_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    apply_cli_overrides(&mut config, &cli);

    let adapter = match skiff_model::from_config(&config.provider) {
        Ok(a) => a,
        Err(e) => {
            error!("failed to initialize provider adapter: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(
        provider = adapter.provider_name(),
        model = adapter.model_name(),
        "provider adapter ready"
    );

    // ── Approvals ─────────────────────────────────────────────────────────────
    let strategy = match config.approval.strategy {
        ApprovalStrategyConfig::Queue => ApprovalStrategy::Queue,
        ApprovalStrategyConfig::Conversational => ApprovalStrategy::Conversational,
    };
    let approvals = Arc::new(ApprovalManager::new(
        config.approval.required.clone(),
        config.approval.capacity,
        strategy,
    ));

    // ── Server-side actions ───────────────────────────────────────────────────
    let mut registry = ActionRegistry::new();
    if strategy == ApprovalStrategy::Conversational {
        registry.register(decision_action(Arc::clone(&approvals)));
    }

    // ── Middleware chain ──────────────────────────────────────────────────────
    let mut middleware = MiddlewareChain::new();
    if config.middleware.request_logging {
        middleware.push(Arc::new(RequestLoggingMiddleware));
    }
    if config.middleware.metrics {
        middleware.push(Arc::new(MetricsMiddleware::new()));
    }
    if !config.middleware.api_keys.is_empty() {
        middleware.push(Arc::new(ApiKeyAuthMiddleware::new(
            config.middleware.api_keys.clone(),
        )));
    }
    if let Some(limit) = config.middleware.rate_limit_per_minute {
        middleware.push(Arc::new(RateLimitMiddleware::new(limit)));
    }

    let runtime = Runtime::builder(adapter)
        .actions(Arc::new(registry))
        .middleware(middleware)
        .approvals(approvals)
        .guardrails(Arc::new(GuardrailsClient::new(&config.cloud.base_url)))
        .build();

    // ── Bind and serve ────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::from(EXIT_BIND);
        }
    };

    match skiff_server::serve(listener, AppState { runtime }).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn apply_cli_overrides(config: &mut skiff_config::Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(provider) = &cli.provider {
        config.provider.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(key) = &cli.api_key {
        config.provider.api_key = Some(key.clone());
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "info,skiff=debug"
    } else {
        "warn,skiff=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
