use thiserror::Error;

/// Failures found while compiling a rule graph, or when asking it for a
/// query it was not compiled with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("no rule can produce {product} from params ({params}){}", format_reasons(.reasons))]
  NoApplicableRule {
    product: String,
    params: String,
    reasons: Vec<String>,
  },

  #[error("ambiguous rules for {product} from params ({params}): {}", .candidates.join(", "))]
  Ambiguous {
    product: String,
    params: String,
    candidates: Vec<String>,
  },

  #[error("rule name {name:?} is registered more than once")]
  DuplicateRule { name: String },

  #[error("{query} depends on {product}, which no rule provides")]
  Unresolved { query: String, product: String },

  #[error("no query for {product} with params ({params}) was declared")]
  NoQuery { product: String, params: String },
}

fn format_reasons(reasons: &[String]) -> String {
  if reasons.is_empty() {
    String::new()
  } else {
    format!(": {}", reasons.join("; "))
  }
}
