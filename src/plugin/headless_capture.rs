//! A plugin whose stream resolution always routes through the
//! headless-browser resolver.
//!
//! Demonstrates the second stream-resolution strategy named in spec.md
//! §4.3: load the episode page, wait for network activity, and extract the
//! first intercepted `.m3u8` request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{AnimeResult, Episode, PluginMetadata, Quality};
use crate::plugin::headless::{HeadlessBrowser, HeadlessBrowserError};
use crate::plugin::{Plugin, PluginError, ResolvedStream};

/// Plugin backed entirely by the headless-browser `.m3u8` capture fallback.
pub struct HeadlessCapturePlugin {
    metadata: PluginMetadata,
    browser: Arc<HeadlessBrowser>,
}

impl HeadlessCapturePlugin {
    #[must_use]
    pub fn new(base_url: impl Into<String>, browser: Arc<HeadlessBrowser>) -> Self {
        Self {
            metadata: PluginMetadata {
                name: "headless-capture".to_string(),
                display_name: "Headless Capture Source".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                base_url: base_url.into(),
                requires_headless_browser: true,
                rate_limit: None,
            },
            browser,
        }
    }
}

#[async_trait]
impl Plugin for HeadlessCapturePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn search(&self, _query: &str) -> Result<Vec<AnimeResult>, PluginError> {
        // Search has no JS-gated dependency for this strategy; a concrete
        // deployment would still walk a JSON/HTML search endpoint here the
        // same way ApiWalkPlugin does. Left empty: this plugin exists to
        // demonstrate the capture strategy, not a second full site driver.
        Ok(Vec::new())
    }

    async fn episodes(&self, _anime_url: &str) -> Result<Vec<Episode>, PluginError> {
        Ok(Vec::new())
    }

    async fn resolve_stream(
        &self,
        episode_url: &str,
        _quality: Quality,
    ) -> Result<ResolvedStream, PluginError> {
        let url = self
            .browser
            .capture_m3u8(episode_url)
            .await
            .map_err(|e| match e {
                HeadlessBrowserError::DriverUnavailable { reason } => {
                    PluginError::HeadlessBrowserUnavailable {
                        plugin: self.metadata.name.clone(),
                        reason,
                    }
                }
                HeadlessBrowserError::NoStreamIntercepted { url } => PluginError::StreamRejected {
                    plugin: self.metadata.name.clone(),
                    reason: format!("no .m3u8 request observed for {url}"),
                },
            })?;

        Ok(ResolvedStream {
            url,
            is_hls: true,
            headers: HashMap::new(),
            requires_headless_browser: true,
        })
    }

    async fn validate_connection(&self) -> bool {
        true
    }
}
