//! Configuration for Spindle modules.
//!
//! Every embedding module resolves the same three concerns before entering its
//! event loop: where the control-channel broker listens, where module
//! specification files live, and how the module should log. [`Config`] carries
//! those settings and layers them from built-in defaults, an optional TOML
//! file, and environment variables, in that order of increasing precedence.

use std::env;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod defaults;
mod logging;
mod socket;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_TCP_PORT, default_control_endpoint, default_log_filter_string,
    default_log_format, default_spec_dir,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError};

/// Environment variable naming an alternative configuration file.
pub const CONFIG_FILE_ENV: &str = "SPINDLE_CONFIG";
/// Environment variable overriding the control-channel endpoint.
pub const CONTROL_SOCKET_ENV: &str = "SPINDLE_CONTROL_SOCKET";
/// Environment variable overriding the specification directory.
pub const SPEC_DIR_ENV: &str = "SPINDLE_SPEC_DIR";
/// Environment variable overriding the log filter expression.
pub const LOG_FILTER_ENV: &str = "SPINDLE_LOG_FILTER";
/// Environment variable overriding the log output format.
pub const LOG_FORMAT_ENV: &str = "SPINDLE_LOG_FORMAT";

/// Extension carried by module specification files.
const SPEC_FILE_EXTENSION: &str = "spec";

/// Resolved configuration shared by the framework and embedding modules.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Endpoint of the control-channel broker the module connects to.
    pub control_socket: SocketEndpoint,
    /// Directory holding `<module>.spec` specification files.
    pub spec_dir: Utf8PathBuf,
    /// Log filter expression in `tracing_subscriber::EnvFilter` syntax.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_socket: default_control_endpoint(),
            spec_dir: default_spec_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the file named by
    /// [`CONFIG_FILE_ENV`] (when set), and environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::read_file(Utf8Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Loads configuration from an explicit file plus environment overrides.
    pub fn load_from(path: &Utf8Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    fn read_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var(CONTROL_SOCKET_ENV) {
            self.control_socket = value
                .parse()
                .map_err(|source| ConfigError::Endpoint { value, source })?;
        }
        if let Ok(value) = env::var(SPEC_DIR_ENV) {
            self.spec_dir = Utf8PathBuf::from(value);
        }
        if let Ok(value) = env::var(LOG_FILTER_ENV) {
            self.log_filter = value;
        }
        if let Ok(value) = env::var(LOG_FORMAT_ENV) {
            self.log_format = value
                .parse()
                .map_err(|source| ConfigError::LogFormat { value, source })?;
        }
        Ok(())
    }

    /// Endpoint of the control-channel broker.
    #[must_use]
    pub fn control_endpoint(&self) -> &SocketEndpoint {
        &self.control_socket
    }

    /// Directory holding module specification files.
    #[must_use]
    pub fn spec_dir(&self) -> &Utf8Path {
        self.spec_dir.as_path()
    }

    /// Path of the specification file for `module_name`.
    #[must_use]
    pub fn spec_path(&self, module_name: &str) -> Utf8PathBuf {
        self.spec_dir
            .join(format!("{module_name}.{SPEC_FILE_EXTENSION}"))
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Errors surfaced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Parsing the configuration file failed.
    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        /// File that could not be parsed.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A control-socket override did not parse as an endpoint.
    #[error("invalid control socket endpoint '{value}': {source}")]
    Endpoint {
        /// Rejected override value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: SocketParseError,
    },
    /// A log-format override did not name a known format.
    #[error("invalid log format '{value}': {source}")]
    LogFormat {
        /// Rejected override value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: LogFormatParseError,
    },
}
