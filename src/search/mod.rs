//! Concurrent, timeout-isolated, deduped, ranked search across plugins.
//!
//! Grounded in `aniplux/cli/search_engine.py::SearchEngine` for the
//! algorithm shape and exact dedup/ranking tuples, and in the teacher's
//! `resolver::registry` fan-out pattern for the concurrency primitive.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{instrument, warn};

use crate::model::AnimeResult;
use crate::plugin::registry::PluginRegistry;

/// Default per-plugin search timeout.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on results kept from any single plugin before ranking.
pub const DEFAULT_MAX_RESULTS_PER_SOURCE: usize = 25;

/// Errors raised by the orchestrator itself, not by individual plugins.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    /// No plugins are registered and enabled.
    ///
    /// `Display` must contain the literal substring `"No active plugins"`
    /// (spec.md §8 scenario 6 asserts on it).
    #[error("No active plugins available to search")]
    NoActivePlugins,

    /// A `--source` filter named a plugin that isn't registered/active.
    #[error("unknown source: {name}")]
    UnknownSource {
        /// The unrecognized source name.
        name: String,
    },
}

/// Tunable knobs for a single orchestrator instance.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub per_plugin_timeout: Duration,
    pub max_results_per_source: usize,
    /// Overall cap applied after dedup/ranking (offset/limit pagination
    /// over the already-ranked list; no per-source pagination state is
    /// retained across calls).
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            per_plugin_timeout: DEFAULT_SEARCH_TIMEOUT,
            max_results_per_source: DEFAULT_MAX_RESULTS_PER_SOURCE,
            limit: None,
            offset: 0,
        }
    }
}

/// Fans a query out to every active plugin (or one, if `source` is given),
/// deduping and ranking the combined results.
#[instrument(skip(registry, options), fields(query, source))]
pub async fn search(
    registry: &PluginRegistry,
    query: &str,
    source: Option<&str>,
    options: &SearchOptions,
) -> Result<Vec<AnimeResult>, SearchError> {
    if registry.is_empty() || registry.active_plugins().is_empty() {
        return Err(SearchError::NoActivePlugins);
    }

    let handlers = registry.find_handlers(source);
    if handlers.is_empty() {
        return Err(SearchError::UnknownSource {
            name: source.unwrap_or_default().to_string(),
        });
    }

    // Deviation from the Python original, recorded in DESIGN.md: each
    // plugin's search is wrapped in its own `tokio::time::timeout` rather
    // than one global `asyncio.as_completed(timeout=...)`, per spec.md's
    // stated per-source timeout isolation requirement.
    let mut futures = Vec::with_capacity(handlers.len());
    for plugin in handlers {
        let query = query.to_string();
        let timeout = options.per_plugin_timeout;
        let max_results = options.max_results_per_source;
        let plugin_name = plugin.metadata().name.clone();
        futures.push(async move {
            let outcome = tokio::time::timeout(timeout, plugin.search(&query)).await;
            match outcome {
                Ok(Ok(mut results)) => {
                    results.truncate(max_results);
                    results
                }
                Ok(Err(e)) => {
                    warn!(plugin = %plugin_name, error = %e, "plugin search failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(plugin = %plugin_name, timeout_secs = timeout.as_secs(), "plugin search timed out");
                    Vec::new()
                }
            }
        });
    }

    let per_plugin_results = futures_util::future::join_all(futures).await;
    let combined: Vec<AnimeResult> = per_plugin_results.into_iter().flatten().collect();

    let deduped = dedup_results(combined);
    let ranked = rank_results(deduped);

    Ok(apply_pagination(ranked, options.offset, options.limit))
}

/// Groups results by normalized title key, keeping the survivor per group
/// (highest `dedup_survivor_key()`).
fn dedup_results(results: Vec<AnimeResult>) -> Vec<AnimeResult> {
    let mut best: HashMap<String, AnimeResult> = HashMap::new();

    for result in results {
        let key = result.dedup_key();
        match best.get(&key) {
            Some(existing) if existing.dedup_survivor_key() >= result.dedup_survivor_key() => {}
            _ => {
                best.insert(key, result);
            }
        }
    }

    best.into_values().collect()
}

/// Sorts by the ranking tuple, highest first.
fn rank_results(mut results: Vec<AnimeResult>) -> Vec<AnimeResult> {
    results.sort_by(|a, b| b.ranking_key().cmp(&a.ranking_key()));
    results
}

fn apply_pagination(results: Vec<AnimeResult>, offset: usize, limit: Option<usize>) -> Vec<AnimeResult> {
    let tail = results.into_iter().skip(offset);
    match limit {
        Some(n) => tail.take(n).collect(),
        None => tail.collect(),
    }
}
