use crate::err::{ConfigError, SysError};

/// Umbrella error for everything that can abort the daemon at startup.
#[derive(Debug)]
pub enum StartupError {
    /// The configuration file could not be read.
    ConfigFile {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file could not be parsed or is inconsistent.
    Config(ConfigError),

    /// A kernel capability could not be acquired.
    Sys(SysError),

    /// An interface named by the configuration does not exist or is down.
    Interface { name: String, reason: &'static str },
}

impl core::fmt::Display for StartupError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use StartupError::*;
        match self {
            ConfigFile { path, source } => {
                write!(f, "failed to open config file '{}': {}", path, source)
            }
            Config(err) => write!(f, "failed to parse config file: {}", err),
            Sys(err) => write!(f, "kernel setup failed: {}", err),
            Interface { name, reason } => {
                write!(f, "interface '{}' rejected: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use StartupError::*;
        match self {
            ConfigFile { source, .. } => Some(source),
            Config(err) => Some(err),
            Sys(err) => Some(err),
            Interface { .. } => None,
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(err: ConfigError) -> StartupError {
        StartupError::Config(err)
    }
}

impl From<SysError> for StartupError {
    fn from(err: SysError) -> StartupError {
        StartupError::Sys(err)
    }
}
