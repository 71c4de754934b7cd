//! kiln-lib: an asynchronous, memoizing build-product engine.
//!
//! - [`store`]: content-addressed storage of files and directory trees
//! - [`process`]: sandboxed process execution with optional result caching
//! - [`rules`]: rule declarations compiled into a static dispatch graph
//! - [`engine`]: the scheduler that runs rules with memoization, deduplication,
//!   cycle detection and reference-counted cancellation
//! - [`options`]: scoped options resolved from args, environment and config

pub mod config;
pub mod consts;
pub mod engine;
pub mod options;
pub mod platform;
pub mod process;
pub mod rules;
pub mod store;
pub mod util;

pub use config::EngineConfig;
pub use engine::{EngineError, Params, RuleContext, Scheduler};
pub use rules::{Inputs, Query, Rule, RuleGraph};
