//! Domain-model and configuration error types.
//!
//! `download::DownloadError`, `plugin::PluginError`, and `search::SearchError`
//! live alongside the code they belong to; these two are small enough, and
//! crosscutting enough, to live at the crate root instead.

use thiserror::Error;

/// Invariant violations raised from [`crate::model`] constructors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An episode was constructed with no advertised quality options.
    #[error("episode {episode} has no quality options")]
    EmptyQualityOptions {
        /// The offending episode number.
        episode: u32,
    },

    /// Episode numbers supplied to a listing were not strictly increasing.
    #[error("episode numbers must be strictly increasing: {previous} then {next}")]
    NonIncreasingEpisodeNumbers {
        /// The previous episode number seen.
        previous: u32,
        /// The out-of-order episode number that followed it.
        next: u32,
    },
}

/// Errors raised when a [`crate::model::SourceConfig`] disagrees with the
/// set of plugins actually registered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The configuration named a plugin that isn't registered.
    #[error("unknown plugin in configuration: {name}")]
    UnknownPlugin {
        /// The unrecognized plugin name.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError::EmptyQualityOptions { episode: 7 };
        assert!(error.to_string().contains('7'));
    }

    #[test]
    fn test_configuration_error_display() {
        let error = ConfigurationError::UnknownPlugin {
            name: "ghost-site".to_string(),
        };
        assert!(error.to_string().contains("ghost-site"));
    }
}
