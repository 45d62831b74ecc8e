// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The WebSocket gateway: one persistent duplex connection per client
//! session, the request gating chain in front of every prompt, and the
//! routing tables that pair client replies with pending server RPCs.
//!
//! # One prompt, end to end
//!
//! ```text
//! ws reader ── ClientAction::Prompt ──► handle_action
//!                                          │ spawn
//!                                          ▼
//!                                     handle_prompt
//!                                          │ gate chain (auth → org → quota)
//!                                          │ usage-response
//!                                          ▼
//!                                     run_root (otto-agent)
//!                                          │ chunks / request-tool-call
//!                                          ▼
//!                                ClientSession ── mpsc ──► ws writer
//! ```
//!
//! The reader loop never blocks on a prompt: prompts run as spawned tasks,
//! so `cancel-user-input` and tool-call replies are processed while an
//! agent tree is streaming.

mod gate;
mod handlers;
mod server;
mod session;
mod ws;

pub use gate::{admit, Admission, GateHalt, RepoGrant};
pub use handlers::handle_action;
pub use server::{router, serve, Gateway};
pub use session::ClientSession;
pub use ws::ws_handler;
