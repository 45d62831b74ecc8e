// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod control;
mod delegated;
mod read_docs;
mod spawn;
mod web_search;

pub use control::{AddMessageTool, EndTurnTool, SetOutputTool, UpdateSubgoalTool};
pub use delegated::{
    BrowserLogsTool, CodeSearchTool, GlobTool, ListDirectoryTool, ReadFilesTool,
    RunFileChangeHooksTool, RunTerminalCommandTool, StrReplaceTool, WriteFileTool,
};
pub use read_docs::ReadDocsTool;
pub use spawn::{SpawnAgentInlineTool, SpawnAgentsTool};
pub use web_search::WebSearchTool;

use crate::registry::ToolRegistry;

/// Build the registry with the full built-in tool set.
///
/// `search_api_key` and `docs_base_url` configure the two charged
/// server-side tools; without them those tools return a configuration error
/// result (and charge nothing).
pub fn builtin_registry(
    search_api_key: Option<String>,
    docs_base_url: Option<String>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Control tools
    registry.register(EndTurnTool);
    registry.register(SetOutputTool);
    registry.register(AddMessageTool);
    registry.register(UpdateSubgoalTool);
    registry.register(SpawnAgentsTool);
    registry.register(SpawnAgentInlineTool);

    // Charged knowledge tools
    registry.register(WebSearchTool {
        api_key: search_api_key,
    });
    registry.register(ReadDocsTool {
        base_url: docs_base_url,
    });

    // Client-delegated tools
    registry.register(WriteFileTool);
    registry.register(StrReplaceTool);
    registry.register(RunTerminalCommandTool);
    registry.register(CodeSearchTool);
    registry.register(GlobTool);
    registry.register(ListDirectoryTool);
    registry.register(ReadFilesTool);
    registry.register(BrowserLogsTool);
    registry.register(RunFileChangeHooksTool);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contains_the_full_set() {
        let registry = builtin_registry(None, None);
        let names = registry.names();
        for expected in [
            "end_turn",
            "set_output",
            "add_message",
            "update_subgoal",
            "spawn_agents",
            "spawn_agent_inline",
            "web_search",
            "read_docs",
            "write_file",
            "str_replace",
            "run_terminal_command",
            "code_search",
            "glob",
            "list_directory",
            "read_files",
            "browser_logs",
            "run_file_change_hooks",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn terminal_and_spawn_tools_end_the_step() {
        let registry = builtin_registry(None, None);
        for name in ["end_turn", "set_output", "spawn_agents", "spawn_agent_inline"] {
            assert!(
                registry.get(name).unwrap().ends_agent_step(),
                "{name} must end the agent step"
            );
        }
        assert!(!registry.get("glob").unwrap().ends_agent_step());
    }
}
