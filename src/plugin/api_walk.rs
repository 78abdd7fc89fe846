//! A plugin demonstrating the "walk a JSON API" stream-resolution strategy.
//!
//! Named for its strategy, not a real site: search hits a JSON search
//! endpoint, episode listing paginates a JSON endpoint, and stream
//! resolution walks an episode-id -> server-list -> per-server-sources
//! chain, exactly like `aniplux/plugins/hianime/extractor.py`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::model::{AnimeResult, Episode, PluginMetadata, Quality};
use crate::plugin::{Plugin, PluginError, ResolvedStream};

#[derive(Debug, Deserialize)]
struct SearchResponseEntry {
    title: String,
    url: String,
    description: Option<String>,
    episode_count: Option<u32>,
    rating: Option<f32>,
    year: Option<u32>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct EpisodeListEntry {
    number: u32,
    title: Option<String>,
    url: String,
    is_filler: Option<bool>,
    description: Option<String>,
    thumbnail: Option<String>,
    air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerListResponse {
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SourceListResponse {
    sources: Vec<SourceEntry>,
    /// Present when the only thing this server offers is an iframe embed
    /// rather than a direct/HLS source list.
    iframe_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    url: String,
    quality: String,
    is_hls: bool,
}

/// Matches an episode id embedded in an episode page URL, e.g.
/// `.../watch/some-anime-123/ep-4567`.
#[allow(clippy::expect_used)]
fn episode_id_regex() -> Regex {
    Regex::new(r"ep-(\d+)$").expect("static pattern")
}

/// JSON-API-walking plugin.
pub struct ApiWalkPlugin {
    metadata: PluginMetadata,
    client: Arc<Client>,
}

impl ApiWalkPlugin {
    #[must_use]
    pub fn new(base_url: impl Into<String>, client: Arc<Client>) -> Self {
        Self {
            metadata: PluginMetadata {
                name: "api-walk".to_string(),
                display_name: "API Walk Source".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                base_url: base_url.into(),
                requires_headless_browser: false,
                rate_limit: None,
            },
            client,
        }
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[async_trait]
impl Plugin for ApiWalkPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn search(&self, query: &str) -> Result<Vec<AnimeResult>, PluginError> {
        let url = format!("{}/api/search?q={}", self.metadata.base_url, urlencoding::encode(query));
        let entries: Vec<SearchResponseEntry> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PluginError::network(self.name(), e.to_string()))?
            .json()
            .await
            .map_err(|e| PluginError::unexpected_response(self.name(), e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|e| AnimeResult {
                title: e.title,
                source: self.metadata.display_name.clone(),
                url: e.url,
                description: e.description.unwrap_or_default(),
                episode_count: e.episode_count,
                rating: e.rating,
                year: e.year,
                thumbnail_url: None,
                genres: e.genres.into_iter().collect(),
                status: e.status,
            })
            .collect())
    }

    async fn episodes(&self, anime_url: &str) -> Result<Vec<Episode>, PluginError> {
        let api_url = format!("{anime_url}/episodes.json");
        let entries: Vec<EpisodeListEntry> = self
            .client
            .get(&api_url)
            .send()
            .await
            .map_err(|e| PluginError::network(self.name(), e.to_string()))?
            .json()
            .await
            .map_err(|e| PluginError::unexpected_response(self.name(), e.to_string()))?;

        entries
            .into_iter()
            .map(|e| {
                Episode::new(
                    e.number,
                    e.title,
                    e.url,
                    &self.metadata.name,
                    vec![Quality::Low, Quality::Medium, Quality::High],
                    e.is_filler.unwrap_or(false),
                    None,
                    e.description,
                    e.thumbnail,
                    e.air_date,
                )
                .map_err(|err| PluginError::unexpected_response(self.name(), err.to_string()))
            })
            .collect()
    }

    async fn resolve_stream(
        &self,
        episode_url: &str,
        quality: Quality,
    ) -> Result<ResolvedStream, PluginError> {
        let re = episode_id_regex();
        let episode_id = re
            .captures(episode_url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                PluginError::unexpected_response(
                    self.name(),
                    format!("could not extract episode id from {episode_url}"),
                )
            })?;

        let servers_url = format!("{}/api/servers/{episode_id}", self.metadata.base_url);
        let server_list: ServerListResponse = self
            .client
            .get(&servers_url)
            .send()
            .await
            .map_err(|e| PluginError::network(self.name(), e.to_string()))?
            .json()
            .await
            .map_err(|e| PluginError::unexpected_response(self.name(), e.to_string()))?;

        for server in &server_list.servers {
            let sources_url = format!(
                "{}/api/sources/{episode_id}/{}",
                self.metadata.base_url, server.id
            );
            let source_list: SourceListResponse = self
                .client
                .get(&sources_url)
                .send()
                .await
                .map_err(|e| PluginError::network(self.name(), e.to_string()))?
                .json()
                .await
                .map_err(|e| PluginError::unexpected_response(self.name(), e.to_string()))?;

            if source_list.sources.is_empty() {
                if source_list.iframe_url.is_some() {
                    return Err(PluginError::HeadlessBrowserRequired {
                        plugin: self.metadata.name.clone(),
                        url: episode_url.to_string(),
                    });
                }
                continue;
            }

            let wanted_label = quality.label();
            if let Some(matching) = source_list.sources.iter().find(|s| s.quality == wanted_label) {
                return Ok(ResolvedStream {
                    url: matching.url.clone(),
                    is_hls: matching.is_hls,
                    headers: HashMap::new(),
                    requires_headless_browser: false,
                });
            }
        }

        Err(PluginError::StreamRejected {
            plugin: self.metadata.name.clone(),
            reason: format!("no server offered quality {quality}"),
        })
    }

    async fn validate_connection(&self) -> bool {
        self.client
            .get(&self.metadata.base_url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
