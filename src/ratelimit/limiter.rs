//! Core rate limiter implementation.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::category::{Category, CategoryRegistry};
use super::clock::{Clock, SystemClock};
use super::counter::{Admission, WindowCounter};
use super::decision::{Allowance, CommitTicket, Decision, Denial, Outcome};
use super::exemption::ExemptionPolicy;
use super::key::{RateKey, RequestContext};
use super::progressive::ProgressiveLimits;
use super::violations::ViolationTracker;
use crate::config::TollgateConfig;
use crate::error::{Result, TollgateError};

/// The rate limiter engine.
///
/// Holds one fixed-window counter per (category, key) pair, sharded by
/// category. Every check for the same pair goes through the counter's map
/// entry lock, so concurrent requests can never push a window past its
/// ceiling. This struct is thread-safe and can be shared across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    registry: CategoryRegistry,
    exemptions: ExemptionPolicy,
    progressive: ProgressiveLimits,
    tracker: Arc<ViolationTracker>,
    clock: Arc<dyn Clock>,
    /// Window counters: category name -> key -> counter
    counters: HashMap<String, DashMap<RateKey, WindowCounter>>,
}

impl RateLimiter {
    /// Build a limiter from configuration using the system clock.
    pub fn from_config(config: &TollgateConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a limiter from configuration with an explicit time source.
    pub fn with_clock(config: &TollgateConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let registry = config.build_registry()?;
        let exemptions = ExemptionPolicy::from_config(&config.exemption, &registry)?;
        let progressive = ProgressiveLimits::from_config(&config.progressive)?;
        let tracker = Arc::new(ViolationTracker::new(
            config.progressive.violation_ttl(),
            clock.clone(),
        ));

        Ok(Self::from_parts(registry, exemptions, progressive, tracker, clock))
    }

    /// Assemble a limiter from already validated components.
    pub fn from_parts(
        registry: CategoryRegistry,
        exemptions: ExemptionPolicy,
        progressive: ProgressiveLimits,
        tracker: Arc<ViolationTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let counters = registry
            .iter()
            .map(|category| (category.name().to_string(), DashMap::new()))
            .collect();

        Self {
            registry,
            exemptions,
            progressive,
            tracker,
            clock,
            counters,
        }
    }

    /// Evaluate a request against a category.
    ///
    /// Fails only for programming errors: an unregistered category or a
    /// context without a network address. Both are detected before any state
    /// is touched. Over-limit callers get [`Decision::Deny`].
    pub fn evaluate(&self, category: &str, ctx: &RequestContext) -> Result<Decision> {
        let (category, counters) = self.lookup(category)?;
        let key = RateKey::resolve(ctx)?;

        trace!(category = %category.name(), key = %key, "Checking rate limit");

        if self.exemptions.is_exempt(category, ctx) {
            trace!(category = %category.name(), key = %key, "Privileged caller exempt");
            return Ok(Decision::Allow(Allowance {
                category_code: category.code(),
                remaining: None,
                ticket: None,
                exempt: true,
            }));
        }

        // The tracker is only consulted when progressive limiting is on.
        let violations = if self.progressive.is_enabled() {
            self.tracker.violation_count(&key)
        } else {
            0
        };
        let ceiling = self.progressive.effective_ceiling(category.ceiling(), violations);
        let now = self.clock.now();

        // Every admitted request takes a slot under the entry lock, including
        // those whose outcome may later release it.
        let (admission, window_start) = {
            let mut counter = counters.entry(key.clone()).or_insert_with(|| {
                debug!(
                    category = %category.name(),
                    key = %key,
                    ceiling = ceiling,
                    window = ?category.window(),
                    "Creating new window counter"
                );
                WindowCounter::new(now)
            });
            counter.roll(now, category.window());
            (
                counter.admit(now, category.window(), ceiling),
                counter.window_start(),
            )
        };

        match admission {
            Admission::Admitted { remaining } => {
                let ticket = category.defers_counting().then(|| CommitTicket {
                    category: category.name().to_string(),
                    key,
                    window_start,
                    issued_at: now,
                });
                Ok(Decision::Allow(Allowance {
                    category_code: category.code(),
                    remaining: Some(remaining),
                    ticket,
                    exempt: false,
                }))
            }
            Admission::Exceeded { retry_after } => {
                let violation_count = self.tracker.record_violation(&key);
                debug!(
                    category = %category.name(),
                    key = %key,
                    ceiling = ceiling,
                    violations = violation_count,
                    retry_after = ?retry_after,
                    "Rate limit exceeded"
                );
                Ok(Decision::Deny(Denial {
                    category_code: category.code(),
                    retry_after,
                    violation_count,
                }))
            }
        }
    }

    /// Settle a ticket once the request's outcome is known.
    ///
    /// A counted outcome keeps the slot taken by [`RateLimiter::evaluate`].
    /// Any other outcome releases it, but only while the window the slot
    /// came from is still current. Returns whether the request stays counted.
    pub fn commit(&self, ticket: CommitTicket, outcome: Outcome) -> Result<bool> {
        let (category, counters) = self.lookup(&ticket.category)?;
        let now = self.clock.now();
        let pending_for = now.saturating_duration_since(ticket.issued_at);

        if category.counts(outcome) {
            trace!(
                category = %category.name(),
                key = %ticket.key,
                outcome = ?outcome,
                pending_for = ?pending_for,
                "Outcome counted"
            );
            return Ok(true);
        }

        if let Some(mut counter) = counters.get_mut(&ticket.key) {
            if counter.window_start() == ticket.window_start
                && !counter.is_expired(now, category.window())
            {
                counter.release();
                trace!(
                    category = %category.name(),
                    key = %ticket.key,
                    outcome = ?outcome,
                    count = counter.count(),
                    pending_for = ?pending_for,
                    "Released slot for uncounted outcome"
                );
            }
        }
        Ok(false)
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub fn purge_expired_windows(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        for category in self.registry.iter() {
            if let Some(counters) = self.counters.get(category.name()) {
                let window = category.window();
                counters.retain(|_, counter| {
                    let keep = !counter.is_expired(now, window);
                    if !keep {
                        removed += 1;
                    }
                    keep
                });
            }
        }

        removed
    }

    /// Count in the current window for a key, or `None` if it has no counter.
    pub fn counter_value(&self, category: &str, key: &RateKey) -> Result<Option<u32>> {
        let (category, counters) = self.lookup(category)?;
        let now = self.clock.now();

        Ok(counters.get(key).map(|counter| {
            if counter.is_expired(now, category.window()) {
                0
            } else {
                counter.count()
            }
        }))
    }

    /// Get the number of live counters across all categories.
    pub fn counter_count(&self) -> usize {
        self.counters.values().map(DashMap::len).sum()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        for counters in self.counters.values() {
            counters.clear();
        }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    pub fn exemptions(&self) -> &ExemptionPolicy {
        &self.exemptions
    }

    pub fn progressive(&self) -> &ProgressiveLimits {
        &self.progressive
    }

    /// The violation tracker shared with the maintenance task.
    pub fn tracker(&self) -> &Arc<ViolationTracker> {
        &self.tracker
    }

    fn lookup(&self, name: &str) -> Result<(&Category, &DashMap<RateKey, WindowCounter>)> {
        let category = self.registry.resolve(name)?;
        let counters = self
            .counters
            .get(category.name())
            .ok_or_else(|| TollgateError::UnknownCategory(name.to_string()))?;
        Ok((category, counters))
    }
}
