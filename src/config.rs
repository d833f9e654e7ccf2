//! Configuration management for Tollgate.
//!
//! Settings come from an optional YAML file with `TOLLGATE_`-prefixed
//! environment variables layered on top, e.g.
//! `TOLLGATE_PROGRESSIVE__ENABLED=true` or
//! `TOLLGATE_CATEGORIES__UPLOAD__CEILING=5`. The exempt set takes a
//! comma-separated list, e.g. `TOLLGATE_EXEMPTION__CATEGORIES=export,admin`.
//! Everything is read once at startup and never changes afterwards.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{
    CategoryOverride, CategoryRegistry, ExemptionConfig, ProgressiveConfig, RegistryBuilder,
};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Per-category overrides, keyed by category name
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryOverride>,

    /// Exemption of privileged callers
    #[serde(default)]
    pub exemption: ExemptionConfig,

    /// Progressive limiting
    #[serde(default)]
    pub progressive: ProgressiveConfig,

    /// Background maintenance
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// How often expired violations and stale counters are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    3600
}

impl MaintenanceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let contents = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading rate limit configuration");
                Some(std::fs::read_to_string(path)?)
            }
            None => None,
        };
        Self::from_sources(contents.as_deref(), Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an environment source over optional YAML text.
    fn from_sources(yaml: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(yaml) = yaml {
            builder = builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        }

        let config: TollgateConfig = builder
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("exemption.categories")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not depend on the category registry.
    pub fn validate(&self) -> Result<()> {
        if self.maintenance.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "maintenance.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.progressive.validate()
    }

    /// Build the category registry: built-in defaults with overrides applied.
    pub fn build_registry(&self) -> Result<CategoryRegistry> {
        let mut builder = RegistryBuilder::with_defaults();
        for (name, overrides) in &self.categories {
            builder.apply_override(name, overrides)?;
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::category;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert!(config.categories.is_empty());
        assert!(config.exemption.enabled);
        assert!(!config.progressive.enabled);
        assert_eq!(config.progressive.violation_ttl(), Duration::from_secs(86400));
        assert_eq!(config.progressive.thresholds.len(), 4);
        assert_eq!(config.maintenance.sweep_interval(), Duration::from_secs(3600));

        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
categories:
  authentication:
    ceiling: 5
    count_successful: true
  UPLOAD:
    window_secs: 120
exemption:
  enabled: false
progressive:
  enabled: true
  violation_ttl_secs: 3600
  thresholds:
    - violations: 0
      multiplier: 1.0
    - violations: 2
      multiplier: 0.5
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert!(!config.exemption.enabled);
        assert!(config.progressive.enabled);
        assert_eq!(config.progressive.thresholds.len(), 2);

        let registry = config.build_registry().unwrap();
        let auth = registry.resolve(category::AUTHENTICATION).unwrap();
        assert_eq!(auth.ceiling(), 5);
        assert!(auth.counts_successful());
        assert_eq!(
            registry.resolve(category::UPLOAD).unwrap().window(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_from_yaml_rejects_bad_thresholds() {
        let yaml = r#"
progressive:
  thresholds:
    - violations: 5
      multiplier: 0.5
    - violations: 1
      multiplier: 0.2
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_unknown_category_override_fails_registry() {
        let yaml = r#"
categories:
  bogus:
    ceiling: 1
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let err = config.build_registry().unwrap_err();
        assert!(matches!(err, TollgateError::UnknownCategory(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let yaml = r#"
progressive:
  enabled: false
categories:
  upload:
    ceiling: 50
"#;
        let config = TollgateConfig::from_sources(
            Some(yaml),
            env(&[
                ("TOLLGATE_PROGRESSIVE__ENABLED", "true"),
                ("TOLLGATE_CATEGORIES__UPLOAD__CEILING", "5"),
                ("TOLLGATE_MAINTENANCE__SWEEP_INTERVAL_SECS", "60"),
            ]),
        )
        .unwrap();

        assert!(config.progressive.enabled);
        assert_eq!(config.categories["upload"].ceiling, Some(5));
        assert_eq!(config.maintenance.sweep_interval_secs, 60);
    }

    #[test]
    fn test_environment_only() {
        let config = TollgateConfig::from_sources(
            None,
            env(&[("TOLLGATE_EXEMPTION__ENABLED", "false")]),
        )
        .unwrap();

        assert!(!config.exemption.enabled);
        assert_eq!(config.exemption.categories.len(), 5);
    }

    #[test]
    fn test_environment_overrides_exempt_set() {
        let yaml = r#"
exemption:
  categories:
    - general
"#;
        let config = TollgateConfig::from_sources(
            Some(yaml),
            env(&[("TOLLGATE_EXEMPTION__CATEGORIES", "export,admin")]),
        )
        .unwrap();

        assert_eq!(config.exemption.categories, vec!["export", "admin"]);
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let yaml = "maintenance:\n  sweep_interval_secs: 0\n";
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }
}
