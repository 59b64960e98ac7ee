//! The on-disk shape of a policy document.

use postwarden_core::PolicySettings;
use postwarden_notify::TemplateRenderer;
use serde::{Deserialize, Serialize};

pub const API_VERSION: &str = "v1";
pub const KIND: &str = "CommunityPolicy";

fn default_true() -> bool {
    true
}

/// ```yaml
/// apiVersion: v1
/// kind: CommunityPolicy
/// metadata:
///   community: pics
///   extends: defaults
/// settings:
///   max_count_per_interval: 1
///   min_post_interval: 24h
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub settings: PolicySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyMetadata {
    pub community: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Disabled documents leave the community unmonitored.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub extends: Option<String>,
}

impl PolicyDocument {
    pub fn new(community: &str, settings: PolicySettings) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: PolicyMetadata {
                community: community.to_lowercase(),
                description: None,
                enabled: true,
                extends: None,
            },
            settings,
        }
    }

    /// Lowercased community name.
    pub fn community(&self) -> String {
        self.metadata.community.trim().to_lowercase()
    }

    /// Everything wrong with the document: envelope, settings and template
    /// syntax. Empty means usable.
    pub fn problems(&self, renderer: &TemplateRenderer) -> Vec<String> {
        let mut problems = Vec::new();
        if self.api_version != API_VERSION {
            problems.push(format!(
                "unsupported apiVersion '{}' (expected '{API_VERSION}')",
                self.api_version
            ));
        }
        if self.kind != KIND {
            problems.push(format!("unexpected kind '{}' (expected '{KIND}')", self.kind));
        }
        if self.community().is_empty() {
            problems.push("metadata.community must not be empty".to_string());
        }
        problems.extend(self.settings.validate());
        for (name, template) in self.settings.templates() {
            if let Err(e) = renderer.validate(template) {
                problems.push(format!("{name} template: {e}"));
            }
        }
        problems
    }

    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
