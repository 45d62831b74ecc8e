// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, TokenCommands};
use otto_billing::{InMemoryAccounts, StoredTokenFile};
use otto_config::TemplateRegistry;
use otto_gateway::Gateway;
use otto_model::{MockProvider, ModelProvider, OpenAiCompatProvider};
use otto_tools::builtin_registry;

/// Credit balance granted to the single operator account of a self-hosted
/// gateway; effectively unmetered.
const OPERATOR_BALANCE: i64 = 1_000_000_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Serve { addr, mock } => serve(&cli, addr.as_deref(), *mock).await,
        Commands::ShowConfig => {
            let config = otto_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Token { command } => match command {
            TokenCommands::Generate { path } => generate_token(path.clone()),
        },
    }
}

async fn serve(cli: &Cli, addr: Option<&str>, mock: bool) -> anyhow::Result<()> {
    let config = Arc::new(otto_config::load(cli.config.as_deref())?);

    let provider: Arc<dyn ModelProvider> = if mock || config.model.provider == "mock" {
        warn!("serving with the mock model driver; prompts need scripted turns");
        Arc::new(MockProvider::new())
    } else {
        let base_url = config
            .model
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = config.model.api_key.clone().or_else(|| {
            config
                .model
                .api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        });
        Arc::new(OpenAiCompatProvider::new(base_url, api_key))
    };

    let accounts = Arc::new(InMemoryAccounts::new());
    match &config.gateway.token_file {
        Some(path) if path.is_file() => {
            let file = StoredTokenFile::load(path)?;
            accounts
                .add_user_with_stored_token("operator", file.token_hash, OPERATOR_BALANCE)
                .await;
        }
        _ => {
            let token =
                std::env::var("OTTO_TOKEN").unwrap_or_else(|_| "local-dev-token".to_string());
            warn!(
                "no token file configured; using the development token \
                 (run `otto token generate`)"
            );
            accounts.add_user("operator", &token, OPERATOR_BALANCE).await;
        }
    }

    let gateway = Gateway {
        provider,
        registry: Arc::new(builtin_registry(None, None)),
        templates: Arc::new(TemplateRegistry::builtin()),
        billing: accounts.clone(),
        users: accounts,
        config: config.clone(),
        http: reqwest::Client::new(),
    };

    let addr = addr.unwrap_or(&config.gateway.listen_addr);
    let addr = addr
        .parse()
        .with_context(|| format!("invalid listen address: {addr}"))?;
    otto_gateway::serve(gateway, addr).await
}

fn generate_token(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => dirs::config_dir()
            .context("cannot determine the config directory; pass --path")?
            .join("otto/token.yaml"),
    };
    let raw = StoredTokenFile::generate_and_save(&path)?;
    println!("New gateway token (shown once, save it now):\n{raw}");
    println!("Hash stored at {}", path.display());
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
