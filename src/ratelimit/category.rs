//! Rate limit categories and the registry that holds them.
//!
//! A category names a class of protected operation (authentication, upload,
//! export, ...) and carries its own window and ceiling. Categories are
//! registered and overridden while the registry is being built; once built,
//! the registry is frozen and only answers lookups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::decision::Outcome;
use crate::error::{Result, TollgateError};

/// Default window for most categories.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default window for uploads.
pub const UPLOAD_WINDOW: Duration = Duration::from_secs(10 * 60);

pub const GENERAL: &str = "GENERAL";
pub const AUTHENTICATION: &str = "AUTHENTICATION";
pub const EXPORT: &str = "EXPORT";
pub const RESERVATION: &str = "RESERVATION";
pub const ADMIN: &str = "ADMIN";
pub const NOTIFICATION: &str = "NOTIFICATION";
pub const REPORT_GENERATION: &str = "REPORT_GENERATION";
pub const UPLOAD: &str = "UPLOAD";

/// Canonical form of a category name. Names are case-insensitive.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// A class of protected operation with its own window and ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    window: Duration,
    ceiling: u32,
    count_successful: bool,
    count_failed: bool,
}

impl Category {
    /// Create a category that counts every request.
    pub fn new(name: &str, window: Duration, ceiling: u32) -> Self {
        Self {
            name: canonical_name(name),
            window,
            ceiling,
            count_successful: true,
            count_failed: true,
        }
    }

    /// Set which request outcomes count toward the ceiling.
    pub fn with_counting(mut self, count_successful: bool, count_failed: bool) -> Self {
        self.count_successful = count_successful;
        self.count_failed = count_failed;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of one fixed window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Base request ceiling per window, before progressive adjustment.
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn counts_successful(&self) -> bool {
        self.count_successful
    }

    pub fn counts_failed(&self) -> bool {
        self.count_failed
    }

    /// Whether a request with the given outcome counts toward the ceiling.
    pub fn counts(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Success => self.count_successful,
            Outcome::Failure => self.count_failed,
        }
    }

    /// Whether counting has to wait until the request's outcome is known.
    pub fn defers_counting(&self) -> bool {
        !(self.count_successful && self.count_failed)
    }

    /// Stable identifier the outer system maps to a user-facing message.
    pub fn code(&self) -> String {
        format!("RATE_LIMIT_{}", self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TollgateError::Config(
                "category name must not be empty".to_string(),
            ));
        }
        if self.ceiling == 0 {
            return Err(TollgateError::Config(format!(
                "category {} must allow at least one request per window",
                self.name
            )));
        }
        if self.window.is_zero() {
            return Err(TollgateError::Config(format!(
                "category {} must have a non-zero window",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} per {}s)",
            self.name,
            self.ceiling,
            self.window.as_secs()
        )
    }
}

/// Partial settings for a category, typically from a config file or the
/// environment. Unset fields keep the registered value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryOverride {
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub ceiling: Option<u32>,
    #[serde(default)]
    pub count_successful: Option<bool>,
    #[serde(default)]
    pub count_failed: Option<bool>,
}

impl CategoryOverride {
    fn apply(&self, category: &Category) -> Category {
        let mut updated = category.clone();
        if let Some(secs) = self.window_secs {
            updated.window = Duration::from_secs(secs);
        }
        if let Some(ceiling) = self.ceiling {
            updated.ceiling = ceiling;
        }
        if let Some(flag) = self.count_successful {
            updated.count_successful = flag;
        }
        if let Some(flag) = self.count_failed {
            updated.count_failed = flag;
        }
        updated
    }
}

/// The built-in categories with their default settings.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new(GENERAL, DEFAULT_WINDOW, 100),
        // Only failed sign-in attempts count against the caller.
        Category::new(AUTHENTICATION, DEFAULT_WINDOW, 10).with_counting(false, true),
        Category::new(EXPORT, DEFAULT_WINDOW, 10),
        Category::new(RESERVATION, DEFAULT_WINDOW, 30),
        Category::new(ADMIN, DEFAULT_WINDOW, 50),
        Category::new(NOTIFICATION, DEFAULT_WINDOW, 20),
        Category::new(REPORT_GENERATION, DEFAULT_WINDOW, 5),
        Category::new(UPLOAD, UPLOAD_WINDOW, 20),
    ]
}

/// Mutable registry used during startup.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    categories: BTreeMap<String, Category>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder pre-populated with [`default_categories`].
    pub fn with_defaults() -> Self {
        let mut categories = BTreeMap::new();
        for category in default_categories() {
            categories.insert(category.name.clone(), category);
        }
        Self { categories }
    }

    /// Register a new category.
    pub fn register(&mut self, category: Category) -> Result<&mut Self> {
        category.validate()?;
        if self.categories.contains_key(&category.name) {
            return Err(TollgateError::DuplicateCategory(category.name));
        }

        debug!(category = %category, "Registered rate limit category");
        self.categories.insert(category.name.clone(), category);
        Ok(self)
    }

    /// Apply explicit overrides to an already registered category.
    pub fn apply_override(&mut self, name: &str, overrides: &CategoryOverride) -> Result<&Category> {
        let key = canonical_name(name);
        let current = self
            .categories
            .get(&key)
            .ok_or_else(|| TollgateError::UnknownCategory(key.clone()))?;

        let updated = overrides.apply(current);
        updated.validate()?;

        debug!(category = %updated, "Applied category override");
        self.categories.insert(key.clone(), updated);
        self.categories
            .get(&key)
            .ok_or(TollgateError::UnknownCategory(key))
    }

    /// Freeze the registry.
    pub fn build(self) -> CategoryRegistry {
        for category in self.categories.values() {
            if !category.count_successful && !category.count_failed {
                warn!(
                    category = %category.name,
                    "Category counts neither successful nor failed requests and will never limit"
                );
            }
        }
        CategoryRegistry {
            categories: self.categories,
        }
    }
}

/// Frozen set of categories. Lookups only.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: BTreeMap<String, Category>,
}

impl CategoryRegistry {
    /// Start building a registry from scratch.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry holding the built-in categories with default settings.
    pub fn with_defaults() -> Self {
        RegistryBuilder::with_defaults().build()
    }

    /// Look up a category by name.
    pub fn resolve(&self, name: &str) -> Result<&Category> {
        self.categories
            .get(name)
            .or_else(|| self.categories.get(&canonical_name(name)))
            .ok_or_else(|| TollgateError::UnknownCategory(name.to_string()))
    }

    /// Iterate categories in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = CategoryRegistry::with_defaults();
        assert_eq!(registry.len(), 8);
        assert!(!registry.is_empty());
        assert!(CategoryRegistry::builder().build().is_empty());

        let auth = registry.resolve(AUTHENTICATION).unwrap();
        assert_eq!(auth.ceiling(), 10);
        assert_eq!(auth.window(), Duration::from_secs(900));
        assert!(!auth.counts_successful());
        assert!(auth.counts_failed());
        assert!(auth.defers_counting());

        let upload = registry.resolve(UPLOAD).unwrap();
        assert_eq!(upload.window(), Duration::from_secs(600));
        assert!(!upload.defers_counting());
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = CategoryRegistry::with_defaults();
        assert_eq!(registry.resolve("export").unwrap().name(), EXPORT);
        assert_eq!(registry.resolve(" Report_Generation ").unwrap().name(), REPORT_GENERATION);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = CategoryRegistry::with_defaults();
        let err = registry.resolve("BOGUS").unwrap_err();
        assert!(matches!(err, TollgateError::UnknownCategory(name) if name == "BOGUS"));
    }

    #[test]
    fn test_register_duplicate() {
        let mut builder = RegistryBuilder::with_defaults();
        let err = builder
            .register(Category::new("general", DEFAULT_WINDOW, 5))
            .unwrap_err();
        assert!(matches!(err, TollgateError::DuplicateCategory(name) if name == GENERAL));
    }

    #[test]
    fn test_register_custom() {
        let mut builder = CategoryRegistry::builder();
        builder
            .register(Category::new("search", Duration::from_secs(60), 40))
            .unwrap()
            .register(Category::new("checkout", Duration::from_secs(60), 3))
            .unwrap();
        let registry = builder.build();

        let names: Vec<&str> = registry.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["CHECKOUT", "SEARCH"]);
    }

    #[test]
    fn test_register_rejects_zero_ceiling() {
        let mut builder = CategoryRegistry::builder();
        let err = builder
            .register(Category::new("broken", DEFAULT_WINDOW, 0))
            .unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_override_partial() {
        let mut builder = RegistryBuilder::with_defaults();
        let updated = builder
            .apply_override(
                "authentication",
                &CategoryOverride {
                    ceiling: Some(3),
                    count_successful: Some(true),
                    ..Default::default()
                },
            )
            .unwrap()
            .clone();

        assert_eq!(updated.ceiling(), 3);
        assert!(updated.counts_successful());
        assert!(updated.counts_failed());
        assert_eq!(updated.window(), DEFAULT_WINDOW);

        let registry = builder.build();
        assert_eq!(registry.resolve(AUTHENTICATION).unwrap(), &updated);
    }

    #[test]
    fn test_override_unknown() {
        let mut builder = RegistryBuilder::with_defaults();
        let err = builder
            .apply_override("bogus", &CategoryOverride::default())
            .unwrap_err();
        assert!(matches!(err, TollgateError::UnknownCategory(_)));
    }

    #[test]
    fn test_override_rejects_zero_window() {
        let mut builder = RegistryBuilder::with_defaults();
        let err = builder
            .apply_override(
                UPLOAD,
                &CategoryOverride {
                    window_secs: Some(0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_counts_outcome() {
        let category = Category::new("login", DEFAULT_WINDOW, 5).with_counting(false, true);
        assert!(!category.counts(Outcome::Success));
        assert!(category.counts(Outcome::Failure));
        assert_eq!(category.code(), "RATE_LIMIT_LOGIN");
    }
}
