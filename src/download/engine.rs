//! Download engine for concurrent episode downloads with retry support.
//!
//! This module provides the `DownloadEngine` which coordinates concurrent
//! downloads using a semaphore-based concurrency control pattern, with
//! automatic retry on transient failures using exponential backoff.
//!
//! # Overview
//!
//! The engine resolves a stream URL for each [`DownloadTask`] through the
//! plugin that produced its episode, then routes the actual transfer to the
//! HLS assembler, the external accelerator, or direct HTTP streaming.
//!
//! # Example
//!
//! ```no_run
//! use animedl_core::download::{Accelerator, DownloadEngine, HttpClient, RetryPolicy, RateLimiter};
//! use animedl_core::model::{DownloadTask, Episode, Quality};
//! use animedl_core::plugin::registry::PluginRegistry;
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PluginRegistry::new();
//! let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(1000)));
//! let accelerator = Arc::new(Accelerator::detect(None));
//! let engine = DownloadEngine::new(10, RetryPolicy::default(), rate_limiter, accelerator)?;
//! let client = HttpClient::new();
//! let episode = Episode::new(1, None, "https://example.com/ep1", "sample", vec![Quality::High], false, None, None, None, None)?;
//! let task = DownloadTask::new(1, "sample", episode, Quality::High, PathBuf::from("ep1.mp4"));
//! let (stats, _tasks) = engine
//!     .process_tasks(vec![task], &registry, &client, Path::new("./downloads"), None)
//!     .await?;
//! println!("Completed: {}, Failed: {}, Retried: {}", stats.completed(), stats.failed(), stats.retried());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::accelerator::Accelerator;
use super::error::DownloadError;
use super::hls;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::HttpClient;
use crate::model::{DownloadStatus, DownloadTask};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::PluginError;
use crate::progress::ProgressSender;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// A task named a plugin that isn't registered/enabled.
    #[error("unknown or disabled source plugin: {name}")]
    UnknownSource {
        /// The plugin name that could not be resolved.
        name: String,
    },
}

/// Statistics from a download batch run.
///
/// Tracks the number of completed, failed, and retried downloads during a
/// `process_tasks()` invocation. Uses atomic counters for thread-safe
/// updates from concurrent download tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed downloads.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of items processed (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    /// Returns the number of retry attempts made.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Download engine for concurrent episode downloads with retry support.
///
/// The engine uses a semaphore to limit the number of concurrent downloads,
/// preventing resource exhaustion and respecting server rate limits. Failed
/// downloads are automatically retried with exponential backoff for transient
/// errors. Per-domain rate limiting ensures requests to the same domain are
/// properly spaced to avoid overwhelming servers.
///
/// # Concurrency Model
///
/// - Each download runs in its own Tokio task
/// - A semaphore permit is acquired before starting each download
/// - Permits are released automatically when downloads complete (RAII)
///
/// # Routing
///
/// Per task: resolve the stream through the owning plugin, then route on
/// `ResolvedStream.is_hls` to the HLS assembler; otherwise prefer the
/// external accelerator when available, falling back to direct HTTP
/// streaming.
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    accelerator: Arc<Accelerator>,
}

impl DownloadEngine {
    /// Creates a new download engine with the specified concurrency limit,
    /// retry policy, rate limiter, and external accelerator.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(retry_policy, rate_limiter, accelerator))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
        accelerator: Arc<Accelerator>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_retries = retry_policy.max_attempts(),
            rate_limit_ms = rate_limiter.default_delay().as_millis(),
            accelerator_available = accelerator.is_available(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            rate_limiter,
            accelerator,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Downloads every task concurrently (bounded by the engine's
    /// concurrency limit), returning aggregate stats and each task in its
    /// final state (`Completed` or `Failed`).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSource`] if a task names a plugin that
    /// isn't registered and enabled, and [`EngineError::SemaphoreClosed`] if
    /// the internal semaphore is closed (a bug, never expected in practice).
    ///
    /// Individual download failures do NOT cause this method to error —
    /// they are reflected in the returned tasks' `status`/`error` fields and
    /// counted in `DownloadStats`.
    #[instrument(skip(self, tasks, registry, client), fields(output_dir = %output_dir.display(), task_count = tasks.len()))]
    pub async fn process_tasks(
        &self,
        tasks: Vec<DownloadTask>,
        registry: &PluginRegistry,
        client: &HttpClient,
        output_dir: &Path,
        progress: Option<ProgressSender>,
    ) -> Result<(DownloadStats, Vec<DownloadTask>), EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let mut handles = Vec::with_capacity(tasks.len());

        info!("starting task batch");

        for task in tasks {
            let Some(plugin) = registry.plugin_handle(&task.source) else {
                return Err(EngineError::UnknownSource { name: task.source });
            };

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let client = client.clone();
            let stats = Arc::clone(&stats);
            let output_dir = output_dir.to_path_buf();
            let retry_policy = self.retry_policy.clone();
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let accelerator = Arc::clone(&self.accelerator);
            let progress = progress.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                download_task_with_retry(
                    plugin.as_ref(),
                    task,
                    &client,
                    &output_dir,
                    &retry_policy,
                    &stats,
                    &rate_limiter,
                    &accelerator,
                    progress.as_ref(),
                )
                .await
            }));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");

        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(task) => finished.push(task),
                Err(e) => warn!(error = %e, "download task panicked"),
            }
        }

        let completed = stats.completed();
        let failed = stats.failed();
        let retried = stats.retried();
        info!(completed, failed, retried, total = completed + failed, "batch complete");

        match Arc::try_unwrap(stats) {
            Ok(stats) => Ok((stats, finished)),
            Err(arc_stats) => {
                let new_stats = DownloadStats::new();
                new_stats.completed.store(arc_stats.completed(), Ordering::SeqCst);
                new_stats.failed.store(arc_stats.failed(), Ordering::SeqCst);
                new_stats.retried.store(arc_stats.retried(), Ordering::SeqCst);
                Ok((new_stats, finished))
            }
        }
    }
}

/// A failure from any stage of a single task's pipeline, carrying enough
/// information to classify it for the retry policy.
#[derive(Debug, thiserror::Error)]
enum TaskFailure {
    #[error("{0}")]
    Plugin(#[from] PluginError),
    #[error("{0}")]
    Hls(#[from] hls::HlsError),
    #[error("{0}")]
    Download(#[from] DownloadError),
}

impl TaskFailure {
    fn failure_type(&self) -> FailureType {
        match self {
            // A plugin's own network call failing is as retryable as ours.
            TaskFailure::Plugin(PluginError::Network { .. }) => FailureType::Transient,
            // Everything else a plugin can report (bad response shape,
            // rejected handshake, headless-browser unavailable/required)
            // needs a different resolution path, not a retry of the same
            // request -- mirrors the teacher's `NeedsAuth` semantics.
            TaskFailure::Plugin(_) => FailureType::NeedsAuth,
            TaskFailure::Hls(_) => FailureType::Transient,
            TaskFailure::Download(e) => classify_error(e),
        }
    }
}

/// Downloads a single task with retry, returning it in its final state.
#[instrument(skip(plugin, task, client, output_dir, policy, stats, rate_limiter, accelerator, progress), fields(task_id = task.id, url = %task.episode.url))]
#[allow(clippy::too_many_arguments)]
async fn download_task_with_retry(
    plugin: &dyn crate::plugin::Plugin,
    mut task: DownloadTask,
    client: &HttpClient,
    output_dir: &Path,
    policy: &RetryPolicy,
    stats: &DownloadStats,
    rate_limiter: &RateLimiter,
    accelerator: &Accelerator,
    progress: Option<&ProgressSender>,
) -> DownloadTask {
    task.status = DownloadStatus::Downloading;
    task.started_at = Some(SystemTime::now());

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        debug!(attempt, "attempting download");

        rate_limiter.acquire(&task.episode.url).await;

        match run_pipeline(plugin, &task, client, output_dir, accelerator, progress).await {
            Ok((path, bytes_downloaded, content_length)) => {
                task.output_path = path;
                task.bytes_downloaded = bytes_downloaded;
                task.content_length = content_length;
                task.status = DownloadStatus::Completed;
                task.completed_at = Some(SystemTime::now());
                stats.increment_completed();
                return task;
            }
            Err(failure) => {
                let failure_type = failure.failure_type();
                let retry_after_delay = if failure_type == FailureType::RateLimited {
                    extract_retry_after_delay(&failure, &task.episode.url, rate_limiter)
                } else {
                    None
                };

                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let delay = retry_after_delay.unwrap_or(backoff_delay);
                        info!(
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %failure,
                            "retrying download"
                        );
                        stats.increment_retried();
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        warn!(%reason, error = %failure, attempts = attempt, "download failed after all attempts");
                        task.status = DownloadStatus::Failed;
                        task.error = Some(failure.to_string());
                        task.completed_at = Some(SystemTime::now());
                        stats.increment_failed();
                        return task;
                    }
                }
            }
        }
    }
}

fn extract_retry_after_delay(
    failure: &TaskFailure,
    url: &str,
    rate_limiter: &RateLimiter,
) -> Option<Duration> {
    let TaskFailure::Download(DownloadError::HttpStatus { retry_after, .. }) = failure else {
        return None;
    };
    let delay = parse_retry_after(retry_after.as_ref()?)?;
    rate_limiter.record_rate_limit(url, delay);
    Some(delay)
}

/// Resolves the stream and routes the actual transfer, returning the final
/// path, bytes written, and content length when known.
///
/// Routing: `is_hls` streams go through the HLS assembler; otherwise the
/// external accelerator is used when available, else direct HTTP. This
/// crate does not probe content-length before choosing the accelerator
/// (the teacher's client has no HEAD-only method); a deployment wanting
/// accelerator use reserved for large files can wrap `Accelerator` to add
/// that probe without changing this routing logic.
async fn run_pipeline(
    plugin: &dyn crate::plugin::Plugin,
    task: &DownloadTask,
    client: &HttpClient,
    output_dir: &Path,
    accelerator: &Accelerator,
    progress: Option<&ProgressSender>,
) -> Result<(std::path::PathBuf, u64, Option<u64>), TaskFailure> {
    let resolved = plugin
        .resolve_stream(&task.episode.url, task.quality)
        .await?;

    if let Some(progress) = progress {
        progress.report(task.id, task.bytes_downloaded, task.content_length);
    }

    if resolved.is_hls {
        let media_playlist_url =
            hls::resolve_media_playlist_url(client.inner(), &resolved.url, task.quality).await?;
        let on_progress = move |_done: u64, _total: Option<u64>| {};
        hls::download_hls_stream(
            client.inner(),
            &media_playlist_url,
            &task.output_path,
            hls::DEFAULT_SEGMENT_CONCURRENCY,
            &on_progress,
        )
        .await?;
        let bytes = tokio::fs::metadata(&task.output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        return Ok((task.output_path.clone(), bytes, Some(bytes)));
    }

    if accelerator.is_available() {
        if let Ok(path) = accelerator.download(&resolved.url, output_dir).await {
            let bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            return Ok((path, bytes, Some(bytes)));
        }
        // Falls through to direct HTTP: the accelerator disables itself
        // permanently on failure, so this is not an infinite loop risk.
    }

    let result = client
        .download_resolved_stream(&resolved.url, output_dir, None, &resolved.headers)
        .await?;
    Ok((result.path, result.bytes_downloaded, result.content_length))
}
