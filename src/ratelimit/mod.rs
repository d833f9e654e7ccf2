//! Rate limiting logic and state management.

pub mod category;
mod clock;
mod counter;
mod decision;
mod exemption;
mod key;
mod limiter;
mod maintenance;
mod progressive;
mod violations;

pub use category::{Category, CategoryOverride, CategoryRegistry, RegistryBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Admission, WindowCounter};
pub use decision::{Allowance, CommitTicket, Decision, DecisionSummary, Denial, Outcome};
pub use exemption::{ExemptionConfig, ExemptionPolicy};
pub use key::{RateKey, RequestContext};
pub use limiter::RateLimiter;
pub use maintenance::{MaintenanceHandle, MaintenanceReport};
pub use progressive::{ProgressiveConfig, ProgressiveLimits, Threshold};
pub use violations::{SweepStats, ViolationTracker};
