//! Core library for searching, listing, and downloading anime episodes
//! across multiple plugin-driven sources.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`model`] - Domain types shared across plugins, search, and downloads
//! - [`plugin`] - The per-site plugin contract, registry, and bundled plugins
//! - [`search`] - Concurrent, deduped, ranked search across active plugins
//! - [`download`] - HTTP/HLS/accelerator download engine with retry support
//! - [`progress`] - Bounded progress reporting from download workers
//! - [`titles`] - Cosmetic anime-title inference for display purposes
//! - [`cli`] - Command-line argument definitions
//! - [`error`] - Crosscutting domain and configuration error types

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod download;
pub mod error;
pub mod model;
pub mod plugin;
pub mod progress;
pub mod search;
pub mod titles;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use download::{
    Accelerator, AcceleratorError, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadEngine,
    DownloadStats, EngineError, FailureType, HttpClient, RateLimiter, RetryDecision, RetryPolicy,
    classify_error,
};
pub use error::{ConfigurationError, ValidationError};
pub use model::{
    AnimeResult, DownloadStatus, DownloadTask, Episode, PluginMetadata, Quality, SourceConfig,
};
pub use plugin::registry::PluginRegistry;
pub use plugin::{Plugin, PluginError, ResolvedStream};
pub use search::{SearchError, SearchOptions, search};
