/// Application name, used for directory names.
pub const APP_NAME: &str = "kiln";

/// Prefix of every environment variable kiln reads.
pub const ENV_PREFIX: &str = "KILN";

/// Name of the options config file looked up by the CLI.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Sub-directory of the store holding persisted process results.
pub const PROCESS_CACHE_DIR: &str = "process-cache";

/// Sub-directory of the store under which sandboxes are created.
pub const SANDBOX_DIR: &str = "sandboxes";
