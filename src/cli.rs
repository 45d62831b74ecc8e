// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "otto",
    version,
    about = "Multi-agent orchestration gateway for LLM coding agents"
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the WebSocket gateway.
    Serve {
        /// Listen address override, e.g. 0.0.0.0:4455.
        #[arg(long)]
        addr: Option<String>,
        /// Use the scripted mock model driver (offline smoke runs).
        #[arg(long)]
        mock: bool,
    },
    /// Print the effective merged configuration as YAML.
    ShowConfig,
    /// Bearer-token management.
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Generate a new gateway token; prints it once and stores its hash.
    Generate {
        /// Token file location (default: the config dir's otto/token.yaml).
        #[arg(long)]
        path: Option<PathBuf>,
    },
}
