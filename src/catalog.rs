//! The domain catalog: built-in domains, custom-domain merging, and
//! prompt-component resolution.
//!
//! The built-in list is immutable and ordered. Custom domains never mutate
//! it: [`merge_all`] produces a fresh merged sequence on every call, with
//! a custom domain replacing a same-slug built-in in place (position
//! preserved) and genuinely new customs appended in input order.
//!
//! # Resolution precedence
//!
//! | Function | Precedence |
//! |----------|-----------|
//! | [`resolve_selection`] | prompt override > built-in match > empty string |
//! | [`resolve_full_details`] | per-field: override > base (custom-or-built-in) > `""` |
//!
//! The strict accessor [`get_config`] surfaces [`CatalogError::NotFound`]
//! instead of defaulting: it backs programmatic domain switching, where a
//! silent default would execute under the wrong role.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::groups::ToolGroup;
use crate::models::{DomainConfig, GroupEntry, GroupOptions};

/// Lookup failures from the strict catalog accessors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no domain with slug '{0}'")]
    NotFound(String),
}

/// A per-domain prompt override supplied by the host's prompt settings.
///
/// Fields that are present replace the corresponding domain fields during
/// resolution; absent fields fall through to the domain definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when_to_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// Composes a domain's own instructions with global and project-level
/// instruction files. The merge itself is opaque to this crate.
pub trait InstructionComposer: Send + Sync {
    fn compose(&self, base: &str, domain_slug: &str, cwd: &Path) -> String;
}

/// Working-directory context for [`resolve_full_details`].
pub struct ResolveContext<'a> {
    pub cwd: &'a Path,
    pub composer: &'a dyn InstructionComposer,
}

fn builtin(
    slug: &str,
    name: &str,
    role: &str,
    when_to_use: &str,
    groups: Vec<GroupEntry>,
) -> DomainConfig {
    DomainConfig {
        slug: slug.to_string(),
        name: name.to_string(),
        role_definition: role.to_string(),
        when_to_use: Some(when_to_use.to_string()),
        custom_instructions: None,
        groups,
        source: None,
    }
}

fn scoped(group: ToolGroup, file_regex: &str, description: &str) -> GroupEntry {
    GroupEntry::Scoped(
        group,
        GroupOptions {
            file_regex: Some(file_regex.to_string()),
            description: Some(description.to_string()),
        },
    )
}

/// The built-in domains, in canonical order. The first entry is the
/// fallback used when a requested slug matches nothing.
static BUILTIN_DOMAINS: Lazy<Vec<DomainConfig>> = Lazy::new(|| {
    vec![
        builtin(
            "general",
            "General",
            "You are a versatile engineering assistant. You read and modify \
             project files, run commands, and use any connected tools to \
             complete the task at hand.",
            "Use this domain for everyday engineering work that does not \
             need specialist context.",
            vec![
                GroupEntry::Bare(ToolGroup::Read),
                GroupEntry::Bare(ToolGroup::Edit),
                GroupEntry::Bare(ToolGroup::Browser),
                GroupEntry::Bare(ToolGroup::Command),
                GroupEntry::Bare(ToolGroup::Mcp),
            ],
        ),
        builtin(
            "healthcare",
            "Healthcare",
            "You are a clinical informatics assistant. You work with \
             clinical documentation, terminology mappings, and structured \
             health data exports, and you are careful to keep patient \
             context accurate and traceable.",
            "Use this domain when the task involves clinical documents, \
             health data formats, or medical terminology.",
            vec![
                GroupEntry::Bare(ToolGroup::Read),
                scoped(
                    ToolGroup::Edit,
                    r"\.(md|csv|json)$",
                    "Clinical notes and structured data exports only",
                ),
                GroupEntry::Bare(ToolGroup::Mcp),
            ],
        ),
        builtin(
            "finance",
            "Finance",
            "You are a financial engineering assistant. You analyze ledgers, \
             reports, and market data, and you keep calculations auditable \
             and reproducible.",
            "Use this domain for accounting data, financial models, and \
             reporting pipelines.",
            vec![
                GroupEntry::Bare(ToolGroup::Read),
                scoped(
                    ToolGroup::Edit,
                    r"\.(md|csv|json|sql)$",
                    "Reports, datasets, and queries only",
                ),
                GroupEntry::Bare(ToolGroup::Mcp),
            ],
        ),
        builtin(
            "legal",
            "Legal",
            "You are a legal drafting assistant. You review and draft \
             contracts, policies, and compliance documents, preserving \
             defined terms and cross-references exactly.",
            "Use this domain for contract review, policy drafting, and \
             compliance checks.",
            vec![
                GroupEntry::Bare(ToolGroup::Read),
                scoped(
                    ToolGroup::Edit,
                    r"\.(md|txt|docx?)$",
                    "Document formats only",
                ),
                GroupEntry::Bare(ToolGroup::Browser),
            ],
        ),
        builtin(
            "research",
            "Research",
            "You are a research assistant. You gather sources, compare \
             findings, and produce well-cited summaries without modifying \
             project code.",
            "Use this domain for literature review and open-ended \
             investigation.",
            vec![
                GroupEntry::Bare(ToolGroup::Read),
                GroupEntry::Bare(ToolGroup::Browser),
                GroupEntry::Bare(ToolGroup::Command),
                GroupEntry::Bare(ToolGroup::Mcp),
            ],
        ),
    ]
});

/// The immutable built-in domain list.
pub fn builtin_domains() -> &'static [DomainConfig] {
    &BUILTIN_DOMAINS
}

/// Look up a built-in domain by slug.
///
/// Custom overrides are intentionally not consulted here; callers that
/// need override-aware resolution go through [`merge_all`] or
/// [`get_config`].
pub fn get_by_slug(slug: &str) -> Option<&'static DomainConfig> {
    builtin_domains().iter().find(|d| d.slug == slug)
}

/// Merge custom domains over the built-ins.
///
/// A custom whose slug matches a built-in replaces it in place; the rest
/// are appended in input order. Built-in order is always preserved.
pub fn merge_all(custom_domains: Option<&[DomainConfig]>) -> Vec<DomainConfig> {
    let mut merged: Vec<DomainConfig> = builtin_domains().to_vec();

    if let Some(customs) = custom_domains {
        for custom in customs {
            match merged.iter_mut().find(|d| d.slug == custom.slug) {
                Some(existing) => *existing = custom.clone(),
                None => merged.push(custom.clone()),
            }
        }
    }

    merged
}

/// Whether `slug` appears in the custom collection, regardless of whether
/// it overrides a built-in.
pub fn is_custom(slug: &str, custom_domains: Option<&[DomainConfig]>) -> bool {
    custom_domains
        .map(|customs| customs.iter().any(|d| d.slug == slug))
        .unwrap_or(false)
}

/// Strict merged lookup. Backs programmatic domain switching, so an
/// unknown slug is surfaced rather than defaulted.
pub fn get_config(
    slug: &str,
    custom_domains: Option<&[DomainConfig]>,
) -> Result<DomainConfig, CatalogError> {
    if let Some(custom) = custom_domains.and_then(|c| c.iter().find(|d| d.slug == slug)) {
        return Ok(custom.clone());
    }
    get_by_slug(slug)
        .cloned()
        .ok_or_else(|| CatalogError::NotFound(slug.to_string()))
}

/// The role text and base instructions selected for prompt assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub role_definition: String,
    pub base_instructions: String,
}

/// Resolve the prompt components for a domain.
///
/// Precedence: prompt override > built-in domain match > empty string.
/// This is an advisory accessor: an unknown slug logs a warning and
/// yields empty strings rather than failing prompt assembly.
pub fn resolve_selection(
    domain_slug: &str,
    prompt_override: Option<&PromptOverride>,
    _custom_domains: Option<&[DomainConfig]>,
) -> Selection {
    let base = get_by_slug(domain_slug);
    if base.is_none() && prompt_override.is_none() {
        warn!(slug = domain_slug, "unknown domain slug, using empty prompt components");
    }

    let role_definition = prompt_override
        .and_then(|o| o.role_definition.clone())
        .or_else(|| base.map(|d| d.role_definition.clone()))
        .unwrap_or_default();
    let base_instructions = prompt_override
        .and_then(|o| o.custom_instructions.clone())
        .or_else(|| base.and_then(|d| d.custom_instructions.clone()))
        .unwrap_or_default();

    Selection {
        role_definition,
        base_instructions,
    }
}

/// Resolve the complete effective definition of a domain.
///
/// The base is the custom-or-built-in match for `slug`, falling back to
/// the first built-in when neither exists. Field precedence is
/// `override ?? base ?? ""`. When a [`ResolveContext`] is supplied, the
/// effective custom instructions are passed through the instruction
/// composer so global and project-level instruction files participate.
pub fn resolve_full_details(
    slug: &str,
    custom_domains: Option<&[DomainConfig]>,
    prompt_overrides: Option<&HashMap<String, PromptOverride>>,
    context: Option<&ResolveContext<'_>>,
) -> DomainConfig {
    let base = custom_domains
        .and_then(|c| c.iter().find(|d| d.slug == slug))
        .cloned()
        .or_else(|| get_by_slug(slug).cloned())
        .unwrap_or_else(|| builtin_domains()[0].clone());

    let overrides = prompt_overrides.and_then(|m| m.get(slug));

    let role_definition = overrides
        .and_then(|o| o.role_definition.clone())
        .unwrap_or_else(|| base.role_definition.clone());
    let when_to_use = overrides
        .and_then(|o| o.when_to_use.clone())
        .or_else(|| base.when_to_use.clone())
        .unwrap_or_default();
    let mut custom_instructions = overrides
        .and_then(|o| o.custom_instructions.clone())
        .or_else(|| base.custom_instructions.clone())
        .unwrap_or_default();

    if let Some(ctx) = context {
        custom_instructions = ctx.composer.compose(&custom_instructions, slug, ctx.cwd);
    }

    DomainConfig {
        role_definition,
        when_to_use: Some(when_to_use),
        custom_instructions: Some(custom_instructions),
        ..base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(slug: &str, role: &str) -> DomainConfig {
        DomainConfig {
            slug: slug.to_string(),
            name: format!("Custom {}", slug),
            role_definition: role.to_string(),
            when_to_use: None,
            custom_instructions: None,
            groups: vec![GroupEntry::Bare(ToolGroup::Read)],
            source: Some(crate::models::DomainSource::Project),
        }
    }

    #[test]
    fn builtins_are_ordered_and_start_with_general() {
        let slugs: Vec<&str> = builtin_domains().iter().map(|d| d.slug.as_str()).collect();
        assert_eq!(
            slugs,
            vec!["general", "healthcare", "finance", "legal", "research"]
        );
    }

    #[test]
    fn get_by_slug_ignores_customs() {
        assert!(get_by_slug("healthcare").is_some());
        assert!(get_by_slug("made-up").is_none());
    }

    #[test]
    fn merge_replaces_builtin_in_place() {
        let customs = vec![custom("healthcare", "Overridden role.")];
        let merged = merge_all(Some(&customs));

        let position = merged.iter().position(|d| d.slug == "healthcare").unwrap();
        let builtin_position = builtin_domains()
            .iter()
            .position(|d| d.slug == "healthcare")
            .unwrap();
        assert_eq!(position, builtin_position);
        assert_eq!(merged[position].role_definition, "Overridden role.");
        assert_eq!(merged.len(), builtin_domains().len());
    }

    #[test]
    fn merge_appends_new_customs_in_input_order() {
        let customs = vec![custom("zeta", "Z."), custom("alpha", "A.")];
        let merged = merge_all(Some(&customs));

        let n = builtin_domains().len();
        assert_eq!(merged[n].slug, "zeta");
        assert_eq!(merged[n + 1].slug, "alpha");
    }

    #[test]
    fn merge_is_idempotent() {
        let customs = vec![custom("healthcare", "X."), custom("new-one", "Y.")];
        let once = merge_all(Some(&customs));
        let twice = merge_all(Some(&customs));
        assert_eq!(once, twice);
    }

    #[test]
    fn is_custom_covers_overrides_and_additions() {
        let customs = vec![custom("healthcare", "X."), custom("new-one", "Y.")];
        assert!(is_custom("healthcare", Some(&customs)));
        assert!(is_custom("new-one", Some(&customs)));
        assert!(!is_custom("general", Some(&customs)));
        assert!(!is_custom("healthcare", None));
    }

    #[test]
    fn get_config_prefers_custom_then_builtin_then_errors() {
        let customs = vec![custom("healthcare", "Overridden.")];
        let found = get_config("healthcare", Some(&customs)).unwrap();
        assert_eq!(found.role_definition, "Overridden.");

        assert!(get_config("general", Some(&customs)).is_ok());

        let missing = get_config("nope", Some(&customs));
        assert!(matches!(missing, Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn resolve_selection_prefers_override() {
        let prompt_override = PromptOverride {
            role_definition: Some("From override.".to_string()),
            when_to_use: None,
            custom_instructions: None,
        };
        let selection = resolve_selection("general", Some(&prompt_override), None);
        assert_eq!(selection.role_definition, "From override.");
    }

    #[test]
    fn resolve_selection_unknown_slug_is_empty() {
        let selection = resolve_selection("made-up", None, None);
        assert_eq!(selection, Selection::default());
    }

    #[test]
    fn full_details_fall_back_to_first_builtin() {
        let details = resolve_full_details("made-up", None, None, None);
        assert_eq!(details.slug, "general");
    }

    #[test]
    fn full_details_apply_per_field_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "healthcare".to_string(),
            PromptOverride {
                role_definition: Some("Override role.".to_string()),
                when_to_use: None,
                custom_instructions: Some("Override instructions.".to_string()),
            },
        );

        let details = resolve_full_details("healthcare", None, Some(&overrides), None);
        assert_eq!(details.role_definition, "Override role.");
        // whenToUse had no override, so the built-in value survives.
        assert_eq!(
            details.when_to_use,
            get_by_slug("healthcare").unwrap().when_to_use
        );
        assert_eq!(
            details.custom_instructions.as_deref(),
            Some("Override instructions.")
        );
    }

    #[test]
    fn full_details_run_instructions_through_composer() {
        struct Suffixing;
        impl InstructionComposer for Suffixing {
            fn compose(&self, base: &str, domain_slug: &str, _cwd: &Path) -> String {
                format!("{}|composed:{}", base, domain_slug)
            }
        }

        let ctx = ResolveContext {
            cwd: Path::new("/tmp/project"),
            composer: &Suffixing,
        };
        let details = resolve_full_details("general", None, None, Some(&ctx));
        assert_eq!(
            details.custom_instructions.as_deref(),
            Some("|composed:general")
        );
    }
}
