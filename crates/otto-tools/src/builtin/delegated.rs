// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Client-delegated tools.
//!
//! The connected client owns the project's disk, terminal and browser; these
//! handlers validate the input, then round-trip the call over the bridge and
//! hand the client's reply back as the tool result. Every handler here is a
//! thin shim: the schemas are the contract.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use otto_proto::ToolCall;

use crate::tool::{
    delegate_to_client, parse_input, HandlerOutcome, ToolContext, ToolHandler, ToolKind,
};

/// Validate with `parse_input::<T>` and forward to the client.
async fn validate_and_delegate<T: serde::de::DeserializeOwned>(
    call: &ToolCall,
    ctx: &ToolContext,
) -> HandlerOutcome {
    if let Err(outcome) = parse_input::<T>(call) {
        return outcome;
    }
    delegate_to_client(call, ctx, None).await
}

// ─── write_file ───────────────────────────────────────────────────────────────

pub struct WriteFileTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct WriteFileInput {
    path: String,
    instructions: String,
    content: String,
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. instructions: one sentence describing \
         the change, for the edit log."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "instructions": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "instructions", "content"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<WriteFileInput>(call, ctx).await
    }
}

// ─── str_replace ──────────────────────────────────────────────────────────────

pub struct StrReplaceTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct StrReplaceInput {
    path: String,
    old: String,
    new: String,
}

#[async_trait]
impl ToolHandler for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. `old` must match exactly once; \
         prefer this over write_file for small edits."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old": { "type": "string" },
                "new": { "type": "string" }
            },
            "required": ["path", "old", "new"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<StrReplaceInput>(call, ctx).await
    }
}

// ─── run_terminal_command ─────────────────────────────────────────────────────

pub struct RunTerminalCommandTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct RunTerminalCommandInput {
    command: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    process_type: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

#[async_trait]
impl ToolHandler for RunTerminalCommandTool {
    fn name(&self) -> &str {
        "run_terminal_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the user's project. process_type SYNC waits \
         for completion; BACKGROUND starts a long-running process."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "mode": { "type": "string", "enum": ["user", "assistant"] },
                "process_type": { "type": "string", "enum": ["SYNC", "BACKGROUND"] },
                "cwd": { "type": "string" },
                "timeout_seconds": { "type": "integer" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<RunTerminalCommandInput>(call, ctx).await
    }
}

// ─── code_search ──────────────────────────────────────────────────────────────

pub struct CodeSearchTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct CodeSearchInput {
    pattern: String,
    #[serde(default)]
    flags: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default, rename = "maxResults")]
    max_results: Option<u64>,
}

#[async_trait]
impl ToolHandler for CodeSearchTool {
    fn name(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex pattern; returns matches grouped \
         by file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "flags": { "type": "string" },
                "cwd": { "type": "string" },
                "maxResults": { "type": "integer" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<CodeSearchInput>(call, ctx).await
    }
}

// ─── glob ─────────────────────────────────────────────────────────────────────

pub struct GlobTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct GlobInput {
    pattern: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[async_trait]
impl ToolHandler for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern; returns {files, count, message}."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "cwd": { "type": "string" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<GlobInput>(call, ctx).await
    }
}

// ─── list_directory ───────────────────────────────────────────────────────────

pub struct ListDirectoryTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct ListDirectoryInput {
    path: String,
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and directories at a path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<ListDirectoryInput>(call, ctx).await
    }
}

// ─── read_files ───────────────────────────────────────────────────────────────

pub struct ReadFilesTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct ReadFilesInput {
    paths: Vec<String>,
}

#[async_trait]
impl ToolHandler for ReadFilesTool {
    fn name(&self) -> &str {
        "read_files"
    }

    fn description(&self) -> &str {
        "Read the contents of one or more files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["paths"],
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<ReadFilesInput>(call, ctx).await
    }
}

// ─── browser_logs ─────────────────────────────────────────────────────────────

pub struct BrowserLogsTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct BrowserLogsInput {
    #[serde(default)]
    lines: Option<u64>,
}

#[async_trait]
impl ToolHandler for BrowserLogsTool {
    fn name(&self) -> &str {
        "browser_logs"
    }

    fn description(&self) -> &str {
        "Fetch recent console logs from the client's connected browser \
         session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lines": { "type": "integer" }
            },
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<BrowserLogsInput>(call, ctx).await
    }
}

// ─── run_file_change_hooks ────────────────────────────────────────────────────

pub struct RunFileChangeHooksTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(dead_code)]
struct RunFileChangeHooksInput {
    #[serde(default)]
    files: Option<Vec<String>>,
}

#[async_trait]
impl ToolHandler for RunFileChangeHooksTool {
    fn name(&self) -> &str {
        "run_file_change_hooks"
    }

    fn description(&self) -> &str {
        "Run the project's configured file-change hooks (formatters, \
         linters) for the given files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": { "type": "array", "items": { "type": "string" } }
            },
            "additionalProperties": false
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ClientDelegated
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> HandlerOutcome {
        validate_and_delegate::<RunFileChangeHooksInput>(call, ctx).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
