//! Limiter decisions and the summary exposed to callers.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::key::RateKey;

/// How a wrapped operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Slot held for a request in a category that only counts some outcomes.
///
/// Hand it back to [`RateLimiter::commit`](super::RateLimiter::commit) once
/// the outcome is known; an uncounted outcome releases the slot. Dropping
/// the ticket keeps the request counted. Not `Clone`: each ticket settles
/// exactly one request.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an uncounted outcome keeps its slot until the ticket is committed"]
pub struct CommitTicket {
    pub(crate) category: String,
    pub(crate) key: RateKey,
    /// Start of the window the slot was taken from
    pub(crate) window_start: Instant,
    pub(crate) issued_at: Instant,
}

impl CommitTicket {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn key(&self) -> &RateKey {
        &self.key
    }
}

/// A request that may proceed.
#[derive(Debug, PartialEq, Eq)]
pub struct Allowance {
    pub category_code: String,
    /// Requests left in the current window; `None` for exempt callers
    pub remaining: Option<u32>,
    /// Present when counting waits on the outcome
    pub ticket: Option<CommitTicket>,
    pub exempt: bool,
}

/// A request that must be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub category_code: String,
    /// Time until the current window closes
    pub retry_after: Duration,
    /// Violations recorded for the key, including this one
    pub violation_count: u32,
}

impl Denial {
    /// Retry delay rounded up to whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }
}

/// Result of evaluating a request against its category.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    Allow(Allowance),
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn category_code(&self) -> &str {
        match self {
            Decision::Allow(a) => &a.category_code,
            Decision::Deny(d) => &d.category_code,
        }
    }

    /// Take the commit ticket out of an allowed decision, if it has one.
    pub fn take_ticket(&mut self) -> Option<CommitTicket> {
        match self {
            Decision::Allow(a) => a.ticket.take(),
            Decision::Deny(_) => None,
        }
    }

    /// The wire-facing view of this decision.
    pub fn summary(&self) -> DecisionSummary {
        match self {
            Decision::Allow(a) => DecisionSummary {
                allowed: true,
                retry_after_seconds: None,
                remaining: a.remaining,
                category_code: a.category_code.clone(),
                violation_count: None,
            },
            Decision::Deny(d) => DecisionSummary {
                allowed: false,
                retry_after_seconds: Some(d.retry_after_secs()),
                remaining: None,
                category_code: d.category_code.clone(),
                violation_count: Some(d.violation_count),
            },
        }
    }
}

/// Decision as reported to the outer system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    pub category_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_count: Option<u32>,
}
