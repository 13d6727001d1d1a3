// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;
use std::path::PathBuf;

/// skiff — AI copilot runtime server.
///
/// Bridges browser chat front-ends and LLM providers: streaming chat over
/// SSE, tool ("action") dispatch, and an approval gate for sensitive calls.
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about)]
pub struct Cli {
    /// Path to the config file (YAML).  Defaults are searched in
    /// /etc/skiff/, ~/.config/skiff/, and the working directory.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Bind host.  Overrides the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port.  Overrides the config file.
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// LLM provider: "deepseek", "openai", or "mock".
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name forwarded to the provider.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Provider API key.  Prefer the provider's environment variable
    /// (DEEPSEEK_API_KEY, OPENAI_API_KEY) over this flag.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Verbose logging to stderr (equivalent to RUST_LOG=skiff=debug).
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
