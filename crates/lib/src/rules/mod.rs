//! Rules and the compiled rule graph.
//!
//! A [`Rule`] maps input product types to one output type and may declare
//! nested requests ([`GetDecl`]). [`RuleGraph`] resolves every declared
//! [`Query`] against the registered rules once, at startup, so that missing
//! or ambiguous providers are reported before anything runs.

pub mod error;
pub mod graph;
pub mod rule;
pub mod types;

pub use error::GraphError;
pub use graph::{Entry, EntryId, Query, RuleGraph, RuleGraphBuilder};
pub use rule::{GetDecl, Inputs, Rule, RuleBuilder};
pub use types::{AnyProduct, ParamValue, TypeKey, Value};
