// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use otto_proto::{AgentTemplate, CustomToolDefinition, McpServerConfig};

use crate::tool::{ToolHandler, END_STEP_FLAG};

/// A tool schema as advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub ends_agent_step: bool,
}

/// What a template (plus per-project custom tools) makes callable for one
/// agent. Built from read-only data per step; the registry itself is shared
/// and immutable after startup.
pub struct ToolScope<'a> {
    pub template: &'a AgentTemplate,
    pub custom_tools: &'a [CustomToolDefinition],
}

impl ToolScope<'_> {
    fn custom(&self, name: &str) -> Option<&CustomToolDefinition> {
        self.custom_tools.iter().find(|t| t.name == name)
    }

    fn mcp_config(&self, name: &str) -> Option<&McpServerConfig> {
        let (server, _) = name.split_once('/')?;
        self.template.mcp_servers.get(server)
    }
}

/// Where a call goes. Resolved synchronously before any task is spawned so
/// the permission decision happens in stream order.
pub enum Route {
    /// Known tool, not in this template's allowed set: suppress the call
    /// entirely and emit an error stream event.
    Denied { message: String },
    /// No such tool anywhere (including the parser's synthetic name for
    /// malformed markup): reject with an `errorMessage` tool result.
    Unknown,
    Builtin(Arc<dyn ToolHandler>),
    /// Custom or MCP tool, executed by the client.
    Delegated { mcp: Option<McpServerConfig> },
}

/// Central registry holding all built-in tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl ToolHandler + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Does any call to `name` end the agent step?
    pub fn ends_agent_step(&self, name: &str, scope: &ToolScope<'_>) -> bool {
        if let Some(tool) = self.tools.get(name) {
            return tool.ends_agent_step();
        }
        scope
            .custom(name)
            .map(|t| t.ends_agent_step)
            .unwrap_or(false)
    }

    /// Resolve where a call by this name goes for the given scope.
    pub fn route(&self, name: &str, scope: &ToolScope<'_>) -> Route {
        if let Some(tool) = self.tools.get(name) {
            if scope.template.tool_names.contains(name) {
                return Route::Builtin(Arc::clone(tool));
            }
            return Route::Denied {
                message: format!("Tool `{name}` is not currently available to this agent."),
            };
        }
        if scope.custom(name).is_some() {
            return Route::Delegated { mcp: None };
        }
        if let Some(config) = scope.mcp_config(name) {
            return Route::Delegated {
                mcp: Some(config.clone()),
            };
        }
        Route::Unknown
    }

    /// Schemas advertised to the model for one scope: allowed built-ins plus
    /// the project's custom tools, sorted by name. Tools that end the agent
    /// step carry the implicit end-step flag in their schema.
    pub fn schemas_for_scope(&self, scope: &ToolScope<'_>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| scope.template.tool_names.contains(t.name()))
            .map(|t| {
                let mut parameters = t.parameters_schema();
                if t.ends_agent_step() {
                    inject_end_step_flag(&mut parameters);
                }
                ToolSchema {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters,
                    ends_agent_step: t.ends_agent_step(),
                }
            })
            .collect();
        for custom in scope.custom_tools {
            let mut parameters = custom.input_schema.clone();
            if custom.ends_agent_step {
                inject_end_step_flag(&mut parameters);
            }
            schemas.push(ToolSchema {
                name: custom.name.clone(),
                description: custom.description.clone(),
                parameters,
                ends_agent_step: custom.ends_agent_step,
            });
        }
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn inject_end_step_flag(schema: &mut Value) {
    if !schema.is_object() {
        *schema = json!({ "type": "object", "properties": {} });
    }
    if let Some(obj) = schema.as_object_mut() {
        let properties = obj.entry("properties").or_insert_with(|| json!({}));
        if let Some(props) = properties.as_object_mut() {
            props.insert(
                END_STEP_FLAG.to_string(),
                json!({ "type": "boolean", "const": true }),
            );
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
