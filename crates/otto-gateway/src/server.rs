// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::info;

use otto_billing::{BillingService, UserStore};
use otto_config::{Config, TemplateRegistry};
use otto_model::ModelProvider;
use otto_tools::ToolRegistry;

use crate::ws::ws_handler;

/// Shared, read-only service handles for the whole gateway process.
#[derive(Clone)]
pub struct Gateway {
    pub provider: Arc<dyn ModelProvider>,
    pub registry: Arc<ToolRegistry>,
    pub templates: Arc<TemplateRegistry>,
    pub billing: Arc<dyn BillingService>,
    pub users: Arc<dyn UserStore>,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

pub fn router(gateway: Gateway) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(gateway)
}

/// Bind and serve until ctrl-c.
pub async fn serve(gateway: Gateway, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
