//! Exemption of privileged callers from selected categories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::category::{self, Category, CategoryRegistry};
use super::key::RequestContext;
use crate::error::Result;

/// Exemption settings as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExemptionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Categories a privileged caller bypasses
    #[serde(default = "default_exempt_categories")]
    pub categories: Vec<String>,
}

impl Default for ExemptionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            categories: default_exempt_categories(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_exempt_categories() -> Vec<String> {
    [
        category::GENERAL,
        category::EXPORT,
        category::REPORT_GENERATION,
        category::ADMIN,
        category::UPLOAD,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

/// Decides whether a request skips limiting entirely.
#[derive(Debug, Clone, Default)]
pub struct ExemptionPolicy {
    enabled: bool,
    categories: BTreeSet<String>,
}

impl ExemptionPolicy {
    /// Build the policy, checking every exempt category against the registry.
    pub fn from_config(config: &ExemptionConfig, registry: &CategoryRegistry) -> Result<Self> {
        let categories = config
            .categories
            .iter()
            .map(|name| registry.resolve(name).map(|c| c.name().to_string()))
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            categories,
        })
    }

    /// A policy that never exempts anyone.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn exempt_categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    /// True iff exemptions are on, the caller is privileged and the category
    /// is in the exempt set.
    pub fn is_exempt(&self, category: &Category, ctx: &RequestContext) -> bool {
        self.enabled && ctx.privileged && self.categories.contains(category.name())
    }
}
