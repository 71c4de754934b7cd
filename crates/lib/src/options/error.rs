use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
  #[error("unknown scope {scope}")]
  UnknownScope { scope: String },

  #[error("unrecognized flag {flag}")]
  UnknownFlag { flag: String },

  #[error("flag {flag} requires a value")]
  MissingValue { flag: String },

  #[error("option {option} is registered twice in scope {scope}")]
  Duplicate { scope: String, option: String },

  #[error("invalid value {value:?} for {scope} option {option} (from {origin}): {message}")]
  InvalidValue {
    scope: String,
    option: String,
    origin: String,
    value: String,
    message: String,
  },

  #[error("invalid config file: {message}")]
  Config { message: String },
}
