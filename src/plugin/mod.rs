//! The per-site plugin contract.
//!
//! Mirrors the teacher's `resolver::Resolver` trait: an `async_trait` object
//! so a `Vec<Box<dyn Plugin>>` can be built and dispatched through
//! dynamically, since native `async fn` in traits is not yet object-safe.

pub mod api_walk;
pub mod headless;
pub mod headless_capture;
pub mod registry;
pub mod sample;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AnimeResult, Episode, PluginMetadata, Quality};
use crate::user_agent;

/// A resolved, ready-to-fetch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    /// The direct media URL (an `.mp4`, or an `.m3u8` playlist when `is_hls`).
    pub url: String,
    /// Whether `url` points at an HLS playlist rather than a direct file.
    pub is_hls: bool,
    /// Headers the download engine must forward when fetching `url` (e.g.
    /// `Referer`/cookie values some sites require).
    pub headers: HashMap<String, String>,
    /// Whether this stream could only be produced via the headless-browser
    /// resolver — informational; the plugin has already done the work.
    pub requires_headless_browser: bool,
}

/// Failures a plugin can report.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin's HTTP request failed outright.
    #[error("{plugin}: network error: {message}")]
    Network {
        /// Name of the plugin that failed.
        plugin: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// The plugin got a response it could not parse into the expected shape.
    #[error("{plugin}: unexpected response shape: {detail}")]
    UnexpectedResponse {
        /// Name of the plugin that failed.
        plugin: String,
        /// What was unexpected about it.
        detail: String,
    },

    /// The remote site rejected a stream-resolution handshake.
    #[error("{plugin}: stream handshake rejected: {reason}")]
    StreamRejected {
        /// Name of the plugin that failed.
        plugin: String,
        /// The site's stated (or inferred) rejection reason.
        reason: String,
    },

    /// This request can only be satisfied through the headless-browser
    /// resolver, and that resolver is unavailable right now.
    #[error("{plugin}: headless browser required but unavailable: {reason}")]
    HeadlessBrowserUnavailable {
        /// Name of the plugin that failed.
        plugin: String,
        /// Why the headless browser could not service the request.
        reason: String,
    },

    /// This request needs headless-browser resolution; the caller should
    /// retry it through the headless fallback rather than treat it as a
    /// hard failure.
    #[error("{plugin}: headless browser resolution required for {url}")]
    HeadlessBrowserRequired {
        /// Name of the plugin that raised this.
        plugin: String,
        /// The URL that needs headless resolution.
        url: String,
    },
}

impl PluginError {
    #[must_use]
    pub fn network(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unexpected_response(plugin: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            plugin: plugin.into(),
            detail: detail.into(),
        }
    }
}

/// Builds the shared `reqwest::Client` HTTP-API-walking plugins should use,
/// carrying this crate's identifying User-Agent.
///
/// # Panics
///
/// Panics if the client builder fails with this static configuration.
#[must_use]
#[allow(clippy::expect_used)]
pub fn build_plugin_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent::default_resolver_user_agent())
        .build()
        .expect("failed to build plugin HTTP client with static configuration")
}

/// Contract every site-specific driver implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Static metadata describing this plugin.
    fn metadata(&self) -> &PluginMetadata;

    /// Searches this source for anime matching `query`.
    async fn search(&self, query: &str) -> Result<Vec<AnimeResult>, PluginError>;

    /// Lists episodes for the anime at `anime_url`.
    async fn episodes(&self, anime_url: &str) -> Result<Vec<Episode>, PluginError>;

    /// Resolves a direct stream URL for one episode at the given quality.
    ///
    /// `quality` has already been narrowed by
    /// [`Episode::best_quality_at_or_below`][crate::model::Episode::best_quality_at_or_below];
    /// implementations must not silently substitute a different quality.
    async fn resolve_stream(
        &self,
        episode_url: &str,
        quality: Quality,
    ) -> Result<ResolvedStream, PluginError>;

    /// Cheap reachability check used by the registry/CLI to report plugin
    /// health without performing a full search.
    async fn validate_connection(&self) -> bool;
}
