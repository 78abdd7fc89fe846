//! A deterministic, fully in-memory reference plugin.
//!
//! Reimplements `aniplux/plugins/sample_plugin.py`'s hardcoded five-anime
//! dataset. This is the crate's primary integration-test fixture: spec.md
//! §8 scenarios 1 and 2 are exact, literal behavior against this plugin,
//! not just illustrative prose.

use async_trait::async_trait;

use crate::model::{AnimeResult, Episode, PluginMetadata, Quality};
use crate::plugin::{Plugin, PluginError, ResolvedStream};

struct SampleAnime {
    title: &'static str,
    description: &'static str,
    episode_count: u32,
    rating: f32,
    year: u32,
    genres: &'static [&'static str],
    status: &'static str,
}

const DATASET: &[SampleAnime] = &[
    SampleAnime {
        title: "Fullmetal Alchemist: Brotherhood",
        description: "Two brothers search for the Philosopher's Stone to restore their bodies.",
        episode_count: 64,
        rating: 9.1,
        year: 2009,
        genres: &["action", "adventure", "fantasy"],
        status: "completed",
    },
    SampleAnime {
        title: "Steins;Gate",
        description: "A self-proclaimed mad scientist discovers time travel through a microwave.",
        episode_count: 24,
        rating: 9.0,
        year: 2011,
        genres: &["sci-fi", "thriller"],
        status: "completed",
    },
    SampleAnime {
        title: "Attack on Titan",
        description: "Humanity fights for survival against man-eating giants behind great walls.",
        episode_count: 25,
        rating: 9.0,
        year: 2013,
        genres: &["action", "drama", "fantasy"],
        status: "completed",
    },
    SampleAnime {
        title: "Hunter x Hunter",
        description: "A boy sets out to become a Hunter to follow in his absent father's footsteps.",
        episode_count: 148,
        rating: 9.0,
        year: 2011,
        genres: &["action", "adventure"],
        status: "completed",
    },
    SampleAnime {
        title: "Mushishi",
        description: "A wandering doctor treats people afflicted by supernatural life forms.",
        episode_count: 26,
        rating: 8.6,
        year: 2005,
        genres: &["mystery", "slice of life"],
        status: "completed",
    },
];

/// Every 10th episode (number % 10 == 0) is flagged as filler.
const FILLER_INTERVAL: u32 = 10;

/// Reference plugin backed entirely by [`DATASET`]; no network access.
#[derive(Debug, Clone)]
pub struct SamplePlugin {
    metadata: PluginMetadata,
}

impl SamplePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: PluginMetadata {
                name: "sample".to_string(),
                display_name: "Sample Source".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                base_url: "https://sample.invalid".to_string(),
                requires_headless_browser: false,
                rate_limit: None,
            },
        }
    }

    fn anime_url(title: &str) -> String {
        let slug = title.to_lowercase().replace([' ', ':', ';'], "-");
        format!("https://sample.invalid/anime/{slug}")
    }
}

impl Default for SamplePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for SamplePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn search(&self, query: &str) -> Result<Vec<AnimeResult>, PluginError> {
        let query = query.to_lowercase();
        let results = DATASET
            .iter()
            .filter(|anime| query.is_empty() || anime.title.to_lowercase().contains(&query))
            .map(|anime| AnimeResult {
                title: anime.title.to_string(),
                source: self.metadata.display_name.clone(),
                url: Self::anime_url(anime.title),
                description: anime.description.to_string(),
                episode_count: Some(anime.episode_count),
                rating: Some(anime.rating),
                year: Some(anime.year),
                thumbnail_url: None,
                genres: anime.genres.iter().map(|g| (*g).to_string()).collect(),
                status: anime.status.to_string(),
            })
            .collect();
        Ok(results)
    }

    async fn episodes(&self, anime_url: &str) -> Result<Vec<Episode>, PluginError> {
        let Some(anime) = DATASET.iter().find(|a| Self::anime_url(a.title) == anime_url) else {
            return Err(PluginError::unexpected_response(
                &self.metadata.name,
                format!("no sample anime at {anime_url}"),
            ));
        };

        let episodes = (1..=anime.episode_count)
            .map(|number| {
                Episode::new(
                    number,
                    Some(format!("{} Episode {number}", anime.title)),
                    format!("{anime_url}/ep-{number}"),
                    &self.metadata.name,
                    vec![Quality::Low, Quality::Medium, Quality::High],
                    number % FILLER_INTERVAL == 0,
                    None,
                    None,
                    None,
                    None,
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PluginError::unexpected_response(&self.metadata.name, e.to_string()))?;

        Ok(episodes)
    }

    async fn resolve_stream(
        &self,
        episode_url: &str,
        quality: Quality,
    ) -> Result<ResolvedStream, PluginError> {
        Ok(ResolvedStream {
            url: format!("{episode_url}.{}.mp4", quality.label()),
            is_hls: false,
            headers: std::collections::HashMap::new(),
            requires_headless_browser: false,
        })
    }

    async fn validate_connection(&self) -> bool {
        true
    }
}
