//! Scoped configuration options.
//!
//! Options are declared per [`Scope`] in an [`OptionRegistry`]. An
//! [`OptionsBootstrapper`] captures one invocation's args, `KILN_*`
//! environment and config file; resolving a scope yields [`ScopedOptions`].
//! Resolution normally happens through the scheduler, with the scope and
//! bootstrapper as params, so each `(scope, bootstrapper)` pair is resolved
//! once.

pub mod bootstrap;
pub mod error;
pub mod registry;
pub mod scope;

pub use bootstrap::{BootstrapperBuilder, OptionsBootstrapper, Rank, RankedValue, ScopedOptions};
pub use error::OptionsError;
pub use registry::{OptionKind, OptionRegistry, OptionSpec, OptionValue};
pub use scope::{GLOBAL_SCOPE, Scope};
