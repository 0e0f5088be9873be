//! Error handling for the portfolio pipeline.
//!
//! The computational components (aggregator, constructor, allocator) degrade
//! locally and never return these errors; they surface only from
//! configuration loading/validation, input parsing and report export.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing, unreadable or out-of-range configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Input records that cannot be used as given
    #[error("invalid input data: {0}")]
    DataError(String),

    #[error("io: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("toml parse: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("toml write: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Trade export
    #[error("csv: {0}")]
    CsvError(#[from] csv::Error),

    /// A caller passed a value the API cannot accept
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors the caller can fix by editing configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Error::ConfigError(_) | Error::TomlError(_) | Error::TomlSerializeError(_))
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_messages_name_the_source() {
        let err = Error::ConfigError("max_leverage must be > 0".to_string());
        assert_eq!(err.to_string(), "invalid configuration: max_leverage must be > 0");
        assert!(err.is_config());

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "macrobook.toml"));
        assert!(io.to_string().starts_with("io: "));
        assert!(!io.is_config());

        assert_matches!(Error::from("plain"), Error::Other(msg) if msg == "plain");
        assert_matches!(Error::from(String::from("owned")), Error::Other(_));
    }

    #[test]
    fn test_toml_error_is_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("max_leverage = ");
        let err = Error::from(parsed.unwrap_err());
        assert!(err.to_string().starts_with("toml parse: "));
        assert!(err.is_config());
    }

    #[test]
    fn test_anyhow_keeps_context_chain() {
        let inner = anyhow::anyhow!("file missing");
        let err = Error::from(inner.context("loading weights"));
        assert_eq!(err.to_string(), "loading weights: file missing");
    }
}
