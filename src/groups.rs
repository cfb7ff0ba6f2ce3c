//! Tool groups and the group → tool expansion table.
//!
//! A [`ToolGroup`] is a named bundle of tool identifiers that a domain can
//! grant. The enumeration is closed: an unknown group name is a
//! deserialization error, never a runtime lookup miss. The expansion table
//! in [`ToolGroup::tools`] is an exhaustive match, so adding a group
//! without listing its tools fails to compile.
//!
//! Tool identifiers themselves stay strings; the host application owns
//! that namespace and extends it without coordinating with this crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed set of grantable tool groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolGroup {
    /// File and workspace inspection tools.
    Read,
    /// File creation and modification tools.
    Edit,
    /// Browser automation.
    Browser,
    /// Shell command execution.
    Command,
    /// MCP server tools and resources.
    Mcp,
    /// Domain switching and task management.
    Modes,
}

/// Tools that every domain may use regardless of its declared groups.
///
/// These bypass all domain scoping: they are how the assistant asks
/// questions, reports completion, and changes domain in the first place.
pub const ALWAYS_AVAILABLE_TOOLS: &[&str] =
    &["ask_question", "complete_task", "switch_domain", "new_task"];

impl ToolGroup {
    /// All groups, in canonical declaration order.
    pub const ALL: &'static [ToolGroup] = &[
        ToolGroup::Read,
        ToolGroup::Edit,
        ToolGroup::Browser,
        ToolGroup::Command,
        ToolGroup::Mcp,
        ToolGroup::Modes,
    ];

    /// The immutable set of tool identifiers this group grants.
    pub fn tools(&self) -> &'static [&'static str] {
        match self {
            ToolGroup::Read => &["read_file", "search_files", "list_files"],
            ToolGroup::Edit => &[
                "write_file",
                "apply_patch",
                "insert_content",
                "search_and_replace",
                // Experiment-gated; see the gate's experiment table.
                "multi_apply_patch",
                "generate_image",
            ],
            ToolGroup::Browser => &["browser_action"],
            ToolGroup::Command => &["execute_command"],
            ToolGroup::Mcp => &["use_mcp_tool", "access_mcp_resource"],
            ToolGroup::Modes => &["switch_domain", "new_task"],
        }
    }

    /// Whether this group's expanded tool set contains `tool`.
    pub fn contains(&self, tool: &str) -> bool {
        self.tools().contains(&tool)
    }

    /// The lowercase group name as it appears in persisted configuration.
    pub fn name(&self) -> &'static str {
        match self {
            ToolGroup::Read => "read",
            ToolGroup::Edit => "edit",
            ToolGroup::Browser => "browser",
            ToolGroup::Command => "command",
            ToolGroup::Mcp => "mcp",
            ToolGroup::Modes => "modes",
        }
    }
}

impl fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether `tool` is always available, regardless of domain.
pub fn is_always_available(tool: &str) -> bool {
    ALWAYS_AVAILABLE_TOOLS.contains(&tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_group_grants_at_least_one_tool() {
        for group in ToolGroup::ALL {
            assert!(!group.tools().is_empty(), "{} grants nothing", group);
        }
    }

    #[test]
    fn edit_contains_write_file() {
        assert!(ToolGroup::Edit.contains("write_file"));
        assert!(!ToolGroup::Edit.contains("read_file"));
    }

    #[test]
    fn always_available_is_domain_independent() {
        for tool in ALWAYS_AVAILABLE_TOOLS {
            assert!(is_always_available(tool));
        }
        assert!(!is_always_available("write_file"));
    }

    #[test]
    fn group_names_roundtrip_through_serde() {
        for group in ToolGroup::ALL {
            let json = serde_json::to_string(group).unwrap();
            assert_eq!(json, format!("\"{}\"", group.name()));
            let back: ToolGroup = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *group);
        }
    }

    #[test]
    fn unknown_group_name_is_rejected() {
        let result: Result<ToolGroup, _> = serde_json::from_str("\"deploy\"");
        assert!(result.is_err());
    }
}
