//! Domain configuration types and validation.
//!
//! A [`DomainConfig`] is one operating profile: role text, usage guidance,
//! and the ordered tool groups the domain may use. The shapes here are the
//! wire contract with the host's persistence layer: field names serialize
//! in camelCase and round-trip losslessly.
//!
//! Custom domains supplied by users are untrusted and must pass
//! [`validate_custom_domains`] before the catalog or gate ever sees them.
//! In particular every `fileRegex` is compiled at validation time, so the
//! gate never encounters an uncompilable pattern.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::groups::ToolGroup;

/// Slugs are restricted to letters, digits, and dashes.
static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new("^[a-zA-Z0-9-]+$").unwrap());

/// Where a custom domain definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainSource {
    /// Defined in the user's global configuration.
    Global,
    /// Defined in the current project's configuration.
    Project,
}

/// Optional scoping attached to a group grant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOptions {
    /// Restrict file-modifying tools in this group to paths matching
    /// this pattern. Must compile as a valid regex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_regex: Option<String>,
    /// Human-readable description of the restriction. Documentation
    /// only, with no behavioral effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One group grant: either a bare group name or a group with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupEntry {
    /// `"read"`: the group's full tool set, unscoped.
    Bare(ToolGroup),
    /// `["edit", { "fileRegex": "..." }]`: the group with options.
    Scoped(ToolGroup, GroupOptions),
}

impl GroupEntry {
    /// The group this entry grants.
    pub fn group(&self) -> ToolGroup {
        match self {
            GroupEntry::Bare(g) => *g,
            GroupEntry::Scoped(g, _) => *g,
        }
    }

    /// The entry's options, if any.
    pub fn options(&self) -> Option<&GroupOptions> {
        match self {
            GroupEntry::Bare(_) => None,
            GroupEntry::Scoped(_, opts) => Some(opts),
        }
    }
}

/// A named operating profile for the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    /// Unique identifier. Letters, digits, and dashes only.
    pub slug: String,
    /// Display label.
    pub name: String,
    /// The role text injected into the system prompt. Non-empty.
    pub role_definition: String,
    /// Guidance on when this domain should be selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when_to_use: Option<String>,
    /// Extra instructions appended after the role definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    /// Ordered group grants. Order matters: the first group containing a
    /// tool is the one whose options are enforced.
    pub groups: Vec<GroupEntry>,
    /// Origin of a custom domain. Absent for built-ins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DomainSource>,
}

/// Rejection reasons for user-supplied custom domains.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid domain slug '{0}': only letters, digits, and dashes are allowed")]
    InvalidSlug(String),

    #[error("domain '{slug}': {field} must not be empty")]
    EmptyField { slug: String, field: &'static str },

    #[error("domain '{slug}': group '{group}' is listed more than once")]
    DuplicateGroup { slug: String, group: ToolGroup },

    #[error("duplicate domain slug '{0}'")]
    DuplicateSlug(String),

    #[error("domain '{slug}': invalid file regex '{pattern}': {source}")]
    InvalidRegex {
        slug: String,
        pattern: String,
        source: regex::Error,
    },
}

/// Validate a single custom domain definition.
pub fn validate_domain(domain: &DomainConfig) -> Result<(), ValidationError> {
    if !SLUG_PATTERN.is_match(&domain.slug) {
        return Err(ValidationError::InvalidSlug(domain.slug.clone()));
    }
    if domain.name.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            slug: domain.slug.clone(),
            field: "name",
        });
    }
    if domain.role_definition.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            slug: domain.slug.clone(),
            field: "roleDefinition",
        });
    }

    let mut seen = HashSet::new();
    for entry in &domain.groups {
        if !seen.insert(entry.group()) {
            return Err(ValidationError::DuplicateGroup {
                slug: domain.slug.clone(),
                group: entry.group(),
            });
        }
        if let Some(pattern) = entry.options().and_then(|o| o.file_regex.as_deref()) {
            if let Err(source) = Regex::new(pattern) {
                return Err(ValidationError::InvalidRegex {
                    slug: domain.slug.clone(),
                    pattern: pattern.to_string(),
                    source,
                });
            }
        }
    }

    Ok(())
}

/// Validate a custom domain collection: each domain individually, plus
/// slug uniqueness across the collection.
pub fn validate_custom_domains(domains: &[DomainConfig]) -> Result<(), ValidationError> {
    let mut slugs = HashSet::new();
    for domain in domains {
        validate_domain(domain)?;
        if !slugs.insert(domain.slug.as_str()) {
            return Err(ValidationError::DuplicateSlug(domain.slug.clone()));
        }
    }
    Ok(())
}
