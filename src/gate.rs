//! The capability gate: per-domain tool permission decisions.
//!
//! [`is_tool_allowed`] answers "may this domain invoke this tool with
//! these parameters?". Always-available tools bypass domain scoping
//! entirely; everything else must be granted by one of the domain's
//! groups. A group entry carrying a `fileRegex` restricts the file paths
//! its write-capable tools may touch; a violation is surfaced as
//! [`GateError::FileRestriction`] so the caller can show the user which
//! pattern blocked which path, never silently swallowed as `false`.
//!
//! Among multiple groups containing the same tool, the earliest declared
//! group wins and its options are the ones enforced; later groups are not
//! consulted. Enforcement is deterministic and explainable from the
//! domain definition alone.

use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::catalog;
use crate::groups;
use crate::models::DomainConfig;

/// Tools whose availability is controlled by an experiment flag.
///
/// A tool listed here is denied unless its experiment id maps to `true`
/// in the caller-supplied flag set.
pub const EXPERIMENT_TOOLS: &[(&str, &str)] = &[
    ("multi_apply_patch", "multiApplyPatch"),
    ("generate_image", "imageGeneration"),
];

/// Host-supplied per-tool availability requirements.
#[derive(Debug, Clone)]
pub enum ToolRequirements {
    /// Every tool is disabled.
    Disabled,
    /// Tools explicitly mapped to `false` are disabled; everything else
    /// is unaffected.
    PerTool(HashMap<String, bool>),
}

/// Parameters of the tool invocation being checked.
///
/// Only the fields relevant to file-restriction enforcement are modeled:
/// a path plus any of diff, content, or a structured operations payload
/// marks the invocation as a file write/modify operation.
#[derive(Debug, Clone, Default)]
pub struct ToolInvocation {
    pub path: Option<String>,
    pub diff: Option<String>,
    pub content: Option<String>,
    pub operations: Option<serde_json::Value>,
}

impl ToolInvocation {
    /// The target path, when this invocation writes or modifies a file.
    fn write_target(&self) -> Option<&str> {
        let writes = self.diff.is_some() || self.content.is_some() || self.operations.is_some();
        match (&self.path, writes) {
            (Some(path), true) => Some(path),
            _ => None,
        }
    }
}

/// Denials the gate surfaces to the user instead of returning `false`.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("domain '{domain}' may only edit files matching {pattern}: {path} is not allowed")]
    FileRestriction {
        /// Display name of the domain whose restriction was violated.
        domain: String,
        /// The `fileRegex` pattern that did not match.
        pattern: String,
        /// The restriction's documentation text, if any.
        description: Option<String>,
        /// The offending path.
        path: String,
    },
}

/// Decide whether `tool` may be invoked under the domain named by
/// `domain_slug`.
///
/// Returns `Ok(false)` for ordinary denials and
/// `Err(GateError::FileRestriction)` when a granted group's file
/// restriction is violated by a write operation.
pub fn is_tool_allowed(
    tool: &str,
    domain_slug: &str,
    custom_domains: Option<&[DomainConfig]>,
    requirements: Option<&ToolRequirements>,
    invocation: Option<&ToolInvocation>,
    experiments: Option<&HashMap<String, bool>>,
) -> Result<bool, GateError> {
    if groups::is_always_available(tool) {
        return Ok(true);
    }

    if let Some((_, experiment_id)) = EXPERIMENT_TOOLS.iter().find(|(t, _)| *t == tool) {
        let enabled = experiments
            .and_then(|flags| flags.get(*experiment_id).copied())
            .unwrap_or(false);
        if !enabled {
            return Ok(false);
        }
    }

    match requirements {
        Some(ToolRequirements::Disabled) => return Ok(false),
        Some(ToolRequirements::PerTool(map)) => {
            if map.get(tool) == Some(&false) {
                return Ok(false);
            }
        }
        None => {}
    }

    let domain = match custom_domains
        .and_then(|c| c.iter().find(|d| d.slug == domain_slug))
        .cloned()
        .or_else(|| catalog::get_by_slug(domain_slug).cloned())
    {
        Some(d) => d,
        None => return Ok(false),
    };

    for entry in &domain.groups {
        if !entry.group().contains(tool) {
            continue;
        }

        let options = match entry.options() {
            None => return Ok(true),
            Some(opts) => opts,
        };

        if let Some(pattern) = options.file_regex.as_deref() {
            if let Some(path) = invocation.and_then(|inv| inv.write_target()) {
                let Ok(re) = Regex::new(pattern) else {
                    // Validation rejects uncompilable patterns before the
                    // gate runs; an unexpected failure here denies.
                    return Ok(false);
                };
                if !re.is_match(path) {
                    return Err(GateError::FileRestriction {
                        domain: domain.name.clone(),
                        pattern: pattern.to_string(),
                        description: options.description.clone(),
                        path: path.to_string(),
                    });
                }
            }
        }

        // First declared group containing the tool wins.
        return Ok(true);
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{ToolGroup, ALWAYS_AVAILABLE_TOOLS};
    use crate::models::{GroupEntry, GroupOptions};

    fn domain_with_groups(slug: &str, groups: Vec<GroupEntry>) -> DomainConfig {
        DomainConfig {
            slug: slug.to_string(),
            name: format!("Test {}", slug),
            role_definition: "Role.".to_string(),
            when_to_use: None,
            custom_instructions: None,
            groups,
            source: None,
        }
    }

    fn write_invocation(path: &str) -> ToolInvocation {
        ToolInvocation {
            path: Some(path.to_string()),
            content: Some("new content".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn always_available_tools_bypass_all_scoping() {
        for domain in crate::catalog::builtin_domains() {
            for tool in ALWAYS_AVAILABLE_TOOLS {
                let allowed = is_tool_allowed(tool, &domain.slug, None, None, None, None).unwrap();
                assert!(allowed, "{} should be allowed in {}", tool, domain.slug);
            }
        }
    }

    #[test]
    fn always_available_beats_disabled_requirements() {
        let allowed = is_tool_allowed(
            "ask_question",
            "general",
            None,
            Some(&ToolRequirements::Disabled),
            None,
            None,
        )
        .unwrap();
        assert!(allowed);
    }

    #[test]
    fn experiment_tool_denied_without_flag() {
        let allowed =
            is_tool_allowed("multi_apply_patch", "general", None, None, None, None).unwrap();
        assert!(!allowed);
    }

    #[test]
    fn experiment_tool_allowed_when_flag_true_and_group_grants() {
        let customs = vec![domain_with_groups(
            "experimental",
            vec![GroupEntry::Bare(ToolGroup::Edit)],
        )];
        let mut flags = HashMap::new();
        flags.insert("multiApplyPatch".to_string(), true);

        let allowed = is_tool_allowed(
            "multi_apply_patch",
            "experimental",
            Some(&customs),
            None,
            None,
            Some(&flags),
        )
        .unwrap();
        assert!(allowed);

        // The flag alone is not enough for a domain without the group.
        let customs_read_only = vec![domain_with_groups(
            "reader",
            vec![GroupEntry::Bare(ToolGroup::Read)],
        )];
        let allowed = is_tool_allowed(
            "multi_apply_patch",
            "reader",
            Some(&customs_read_only),
            None,
            None,
            Some(&flags),
        )
        .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn disabled_requirements_deny_everything() {
        let allowed = is_tool_allowed(
            "read_file",
            "general",
            None,
            Some(&ToolRequirements::Disabled),
            None,
            None,
        )
        .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn per_tool_requirements_deny_explicit_false_only() {
        let mut map = HashMap::new();
        map.insert("read_file".to_string(), false);
        map.insert("list_files".to_string(), true);
        let reqs = ToolRequirements::PerTool(map);

        assert!(!is_tool_allowed("read_file", "general", None, Some(&reqs), None, None).unwrap());
        assert!(is_tool_allowed("list_files", "general", None, Some(&reqs), None, None).unwrap());
        // Absent from the map: unaffected.
        assert!(is_tool_allowed("write_file", "general", None, Some(&reqs), None, None).unwrap());
    }

    #[test]
    fn unknown_domain_denies() {
        let allowed = is_tool_allowed("read_file", "nope", None, None, None, None).unwrap();
        assert!(!allowed);
    }

    #[test]
    fn tool_outside_all_groups_denies() {
        let customs = vec![domain_with_groups(
            "read-only",
            vec![GroupEntry::Bare(ToolGroup::Read)],
        )];
        let allowed =
            is_tool_allowed("write_file", "read-only", Some(&customs), None, None, None).unwrap();
        assert!(!allowed);
    }

    #[test]
    fn file_restriction_blocks_non_matching_write() {
        let customs = vec![domain_with_groups(
            "docs-only",
            vec![GroupEntry::Scoped(
                ToolGroup::Edit,
                GroupOptions {
                    file_regex: Some(r"\.md$".to_string()),
                    description: Some("Markdown files only".to_string()),
                },
            )],
        )];

        let result = is_tool_allowed(
            "write_file",
            "docs-only",
            Some(&customs),
            None,
            Some(&write_invocation("src/main.rs")),
            None,
        );

        match result {
            Err(GateError::FileRestriction {
                domain,
                pattern,
                description,
                path,
            }) => {
                assert_eq!(domain, "Test docs-only");
                assert_eq!(pattern, r"\.md$");
                assert_eq!(description.as_deref(), Some("Markdown files only"));
                assert_eq!(path, "src/main.rs");
            }
            other => panic!("expected FileRestriction, got {:?}", other),
        }
    }

    #[test]
    fn file_restriction_allows_matching_write() {
        let customs = vec![domain_with_groups(
            "docs-only",
            vec![GroupEntry::Scoped(
                ToolGroup::Edit,
                GroupOptions {
                    file_regex: Some(r"\.md$".to_string()),
                    description: None,
                },
            )],
        )];

        let allowed = is_tool_allowed(
            "write_file",
            "docs-only",
            Some(&customs),
            None,
            Some(&write_invocation("docs/README.md")),
            None,
        )
        .unwrap();
        assert!(allowed);
    }

    #[test]
    fn non_write_invocation_ignores_file_regex() {
        let customs = vec![domain_with_groups(
            "docs-only",
            vec![GroupEntry::Scoped(
                ToolGroup::Edit,
                GroupOptions {
                    file_regex: Some(r"\.md$".to_string()),
                    description: None,
                },
            )],
        )];

        // A path alone (no diff/content/operations) is not a write.
        let invocation = ToolInvocation {
            path: Some("src/main.rs".to_string()),
            ..Default::default()
        };
        let allowed = is_tool_allowed(
            "write_file",
            "docs-only",
            Some(&customs),
            None,
            Some(&invocation),
            None,
        )
        .unwrap();
        assert!(allowed);
    }

    #[test]
    fn earliest_group_containing_tool_wins() {
        // The restricted edit entry comes first; a later bare edit entry
        // would be more permissive but must not be consulted.
        let customs = vec![domain_with_groups(
            "ordered",
            vec![
                GroupEntry::Scoped(
                    ToolGroup::Edit,
                    GroupOptions {
                        file_regex: Some(r"\.md$".to_string()),
                        description: None,
                    },
                ),
                GroupEntry::Bare(ToolGroup::Command),
            ],
        )];

        let result = is_tool_allowed(
            "write_file",
            "ordered",
            Some(&customs),
            None,
            Some(&write_invocation("src/lib.rs")),
            None,
        );
        assert!(matches!(result, Err(GateError::FileRestriction { .. })));

        // A tool from a later group is still reachable.
        let allowed =
            is_tool_allowed("execute_command", "ordered", Some(&customs), None, None, None)
                .unwrap();
        assert!(allowed);
    }

    #[test]
    fn custom_override_replaces_builtin_grants() {
        // Built-in general grants edit; the custom override narrows it
        // to read-only, and the gate must see the override.
        let customs = vec![domain_with_groups(
            "general",
            vec![GroupEntry::Bare(ToolGroup::Read)],
        )];
        let allowed =
            is_tool_allowed("write_file", "general", Some(&customs), None, None, None).unwrap();
        assert!(!allowed);
    }
}
