//! The scheduler and everything rule bodies see of it.

pub mod context;
pub mod error;
pub mod intrinsics;
pub mod params;
pub mod scheduler;

pub use context::RuleContext;
pub use error::EngineError;
pub use intrinsics::{intrinsic_queries, intrinsic_rules};
pub use params::Params;
pub use scheduler::{Scheduler, SchedulerStats};
