//! Environment-driven configuration shared by the binaries.

use std::env;
use std::str::FromStr;

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("invalid value {value:?} for {key}: {reason}"))]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[snafu(display("{key} is not valid unicode"))]
    NotUnicode { key: String },
}

/// Reads `key` from the environment, falling back to `default` when unset.
/// A present but unparseable value is an error, not a silent default.
pub fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key: key.to_owned(),
            value: raw.clone(),
            reason: err.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_owned(),
        }),
    }
}
