//! Tollgate - In-process abuse prevention
//!
//! This crate throttles request rates per caller across independent operation
//! categories. Callers are identified by their authenticated principal when
//! known and by network address otherwise, privileged callers can be exempted
//! from selected categories, and keys that keep exceeding their limits get
//! progressively smaller ceilings for as long as their violations are recent.
//!
//! ```no_run
//! use tollgate::config::TollgateConfig;
//! use tollgate::ratelimit::{Decision, RateLimiter, RequestContext};
//!
//! # fn main() -> tollgate::error::Result<()> {
//! let config = TollgateConfig::load(None)?;
//! let limiter = RateLimiter::from_config(&config)?;
//!
//! let ctx = RequestContext::from_address("203.0.113.7").with_principal("alice");
//! match limiter.evaluate("EXPORT", &ctx)? {
//!     Decision::Allow(_) => { /* run the export */ }
//!     Decision::Deny(denial) => println!("retry in {}s", denial.retry_after_secs()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
