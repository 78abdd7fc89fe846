//! Domain types shared across the plugin, search, and download layers.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Stream/file quality ladder, ordered low to high so fallback search can
/// walk down it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
    FourK,
}

impl Quality {
    /// All variants, low to high.
    pub const ALL: [Quality; 5] = [
        Quality::Low,
        Quality::Medium,
        Quality::High,
        Quality::Ultra,
        Quality::FourK,
    ];

    /// The nominal resolution label for this quality tier.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Quality::Low => "480p",
            Quality::Medium => "720p",
            Quality::High => "1080p",
            Quality::Ultra => "1440p",
            Quality::FourK => "2160p",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing a [`Quality`] from a string fails.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized quality: {0}")]
pub struct ParseQualityError(String);

impl FromStr for Quality {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "480p" => Ok(Quality::Low),
            "medium" | "720p" => Ok(Quality::Medium),
            "high" | "1080p" => Ok(Quality::High),
            "ultra" | "1440p" => Ok(Quality::Ultra),
            "fourk" | "4k" | "2160p" => Ok(Quality::FourK),
            other => Err(ParseQualityError(other.to_string())),
        }
    }
}

/// A single search hit returned by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeResult {
    pub title: String,
    pub source: String,
    pub url: String,
    pub description: String,
    pub episode_count: Option<u32>,
    pub rating: Option<f32>,
    pub year: Option<u32>,
    pub thumbnail_url: Option<String>,
    /// Genre tags as reported by the source (e.g. "action", "shounen").
    /// Empty when the source doesn't expose genres.
    pub genres: HashSet<String>,
    /// Airing status as reported by the source (e.g. "ongoing",
    /// "completed"). Empty when the source doesn't expose it.
    pub status: String,
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

impl AnimeResult {
    /// Normalized dedup key: lowercase, punctuation stripped, stop-words
    /// removed, whitespace collapsed.
    ///
    /// Grounded in `aniplux/cli/search_engine.py::remove_duplicate_results`.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        let lowered = self.title.to_lowercase();
        let stripped: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        stripped
            .split_whitespace()
            .filter(|word| !STOP_WORDS.contains(word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Tuple used to pick the survivor within a dedup group: highest wins.
    #[must_use]
    pub fn dedup_survivor_key(&self) -> (f32, u32, usize) {
        (
            self.rating.unwrap_or(0.0),
            self.episode_count.unwrap_or(0),
            self.description.len(),
        )
    }

    /// Tuple used to rank the final, deduped result list: highest wins.
    ///
    /// Grounded in `aniplux/cli/search_engine.py::sort_results`.
    #[must_use]
    pub fn ranking_key(&self) -> (OrderedF32, usize, u32) {
        (
            OrderedF32(self.rating.unwrap_or(0.0)),
            self.description.len(),
            self.episode_count.unwrap_or(0),
        )
    }
}

/// Thin `f32` wrapper with a total order, for use as a sort key.
///
/// `f32` has no `Ord` impl because of `NaN`; ranking never produces `NaN`
/// (it only ever sorts `rating.unwrap_or(0.0)`), so this just needs to
/// compile and sort consistently, not handle `NaN` meaningfully.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF32(pub f32);

impl Eq for OrderedF32 {}

impl PartialOrd for OrderedF32 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF32 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// A single episode listing for an anime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub number: u32,
    pub title: Option<String>,
    pub url: String,
    /// Name of the plugin/source this episode listing came from.
    pub source: String,
    /// Sorted descending by rung (best quality first), deduplicated,
    /// non-empty.
    pub quality_options: Vec<Quality>,
    pub is_filler: bool,
    pub duration: Option<Duration>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    /// Air date as reported by the source, e.g. `"2013-04-07"`. Free-form:
    /// no calendar library is pulled in just to validate this.
    pub air_date: Option<String>,
}

impl Episode {
    /// Builds an episode, enforcing the descending-sorted/de-duplicated/
    /// non-empty invariant on `quality_options`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ValidationError::EmptyQualityOptions`] if
    /// `quality_options` is empty.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: u32,
        title: Option<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        mut quality_options: Vec<Quality>,
        is_filler: bool,
        duration: Option<Duration>,
        description: Option<String>,
        thumbnail: Option<String>,
        air_date: Option<String>,
    ) -> Result<Self, crate::error::ValidationError> {
        if quality_options.is_empty() {
            return Err(crate::error::ValidationError::EmptyQualityOptions {
                episode: number,
            });
        }
        quality_options.sort_unstable_by(|a, b| b.cmp(a));
        quality_options.dedup();

        Ok(Self {
            number,
            title,
            url: url.into(),
            source: source.into(),
            quality_options,
            is_filler,
            duration,
            description,
            thumbnail,
            air_date,
        })
    }

    /// Walks the quality ladder down from `requested` to find the best
    /// quality this episode actually advertises, never falling back to
    /// anything higher than requested.
    ///
    /// Grounded in `aniplux/core/utils.py::get_best_quality_available`.
    #[must_use]
    pub fn best_quality_at_or_below(&self, requested: Quality) -> Option<Quality> {
        self.quality_options
            .iter()
            .copied()
            .filter(|q| *q <= requested)
            .max()
    }
}

/// Lifecycle states for a [`DownloadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// A single episode download in flight (or finished).
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: u64,
    /// Name of the plugin that produced `episode`, used to look the owning
    /// plugin back up in the registry when the engine resolves the stream.
    pub source: String,
    pub episode: Episode,
    pub quality: Quality,
    pub output_path: PathBuf,
    pub bytes_downloaded: u64,
    pub content_length: Option<u64>,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

impl DownloadTask {
    /// Creates a new, `Pending` task for the given episode/quality/destination.
    #[must_use]
    pub fn new(
        id: u64,
        source: impl Into<String>,
        episode: Episode,
        quality: Quality,
        output_path: PathBuf,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            episode,
            quality,
            output_path,
            bytes_downloaded: 0,
            content_length: None,
            status: DownloadStatus::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task is currently making (or about to make) progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Pending | DownloadStatus::Downloading | DownloadStatus::Paused
        )
    }

    /// Whether the task has reached a state it will never leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    /// Whether a retry makes sense from the current state.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        matches!(self.status, DownloadStatus::Failed)
    }

    /// Percent complete, when the total size is known.
    #[must_use]
    pub fn progress_percent(&self) -> Option<f32> {
        let total = self.content_length?;
        if total == 0 {
            return Some(100.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Some((self.bytes_downloaded as f64 / total as f64 * 100.0) as f32)
    }
}

/// Static information describing a compiled-in plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub base_url: String,
    pub requires_headless_browser: bool,
    pub rate_limit: Option<Duration>,
}

/// External, caller-supplied configuration for one plugin.
///
/// Read once by [`crate::plugin::registry::PluginRegistry`]'s constructor;
/// never persisted to disk by this crate (spec.md explicitly scopes
/// persisted configuration files out).
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub disabled: HashSet<String>,
    pub rate_limit_overrides: std::collections::HashMap<String, Duration>,
}

impl SourceConfig {
    #[must_use]
    pub fn is_disabled(&self, plugin_name: &str) -> bool {
        self.disabled.contains(plugin_name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::Low < Quality::Medium);
        assert!(Quality::Medium < Quality::High);
        assert!(Quality::High < Quality::Ultra);
        assert!(Quality::Ultra < Quality::FourK);
    }

    #[test]
    fn test_quality_from_str_round_trip() {
        for q in Quality::ALL {
            let label = q.label();
            assert_eq!(label.parse::<Quality>().unwrap(), q);
        }
    }

    #[test]
    fn test_dedup_key_strips_stop_words_and_case() {
        let a = AnimeResult {
            title: "The Promised Neverland".to_string(),
            source: "sample".to_string(),
            url: "https://example.com/a".to_string(),
            description: String::new(),
            episode_count: None,
            rating: None,
            year: None,
            thumbnail_url: None,
            genres: HashSet::new(),
            status: String::new(),
        };
        let b = AnimeResult {
            title: "Promised neverland".to_string(),
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), "promised neverland");
    }

    #[test]
    fn test_episode_rejects_empty_quality_options() {
        let result = Episode::new(
            1,
            None,
            "https://example.com/ep1",
            "sample",
            vec![],
            false,
            None,
            None,
            None,
            None,
        );
        assert!(matches!(
            result,
            Err(crate::error::ValidationError::EmptyQualityOptions { episode: 1 })
        ));
    }

    #[test]
    fn test_episode_sorts_and_dedups_quality_options() {
        let ep = Episode::new(
            1,
            None,
            "https://example.com/ep1",
            "sample",
            vec![Quality::High, Quality::Low, Quality::High],
            false,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(ep.quality_options, vec![Quality::High, Quality::Low]);
    }

    #[test]
    fn test_best_quality_never_exceeds_requested() {
        let ep = Episode::new(
            1,
            None,
            "https://example.com/ep1",
            "sample",
            vec![Quality::Low, Quality::Medium, Quality::Ultra],
            false,
            None,
            None,
            None,
            None,
        )
        .unwrap();

        assert_eq!(ep.best_quality_at_or_below(Quality::High), Some(Quality::Medium));
        assert_eq!(ep.best_quality_at_or_below(Quality::FourK), Some(Quality::Ultra));
        assert_eq!(ep.best_quality_at_or_below(Quality::Low), Some(Quality::Low));
    }

    fn sample_episode() -> Episode {
        Episode::new(
            1,
            None,
            "https://example.com/ep1",
            "sample",
            vec![Quality::High],
            false,
            None,
            None,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_download_task_lifecycle_helpers() {
        let ep = sample_episode();
        let mut task = DownloadTask::new(1, "sample", ep, Quality::High, PathBuf::from("/tmp/ep1.mp4"));
        assert!(task.is_active());
        assert!(!task.is_terminal());
        assert!(!task.can_retry());

        task.status = DownloadStatus::Failed;
        assert!(!task.is_active());
        assert!(task.is_terminal());
        assert!(task.can_retry());
    }

    #[test]
    fn test_progress_percent() {
        let ep = sample_episode();
        let mut task = DownloadTask::new(1, "sample", ep, Quality::High, PathBuf::from("/tmp/ep1.mp4"));
        assert_eq!(task.progress_percent(), None);
        task.content_length = Some(200);
        task.bytes_downloaded = 50;
        assert!((task.progress_percent().unwrap() - 25.0).abs() < f32::EPSILON);
    }
}
