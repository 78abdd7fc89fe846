//! Download engine: resolves and fetches episode streams to disk.
//!
//! This module provides [`HttpClient`] for direct HTTP/HTTPS streaming,
//! [`hls`] for `.m3u8` assembly, [`accelerator`] for external-binary
//! delegation, and [`DownloadEngine`] to coordinate all three across a
//! concurrent batch of [`crate::model::DownloadTask`]s.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large files)
//! - Automatic filename extraction from Content-Disposition headers
//! - Configurable timeouts (30s connect, 5min read by default)
//! - Structured error types with full context
//! - Duplicate filename handling (adds numeric suffix)
//!
//! # Example
//!
//! ```no_run
//! use animedl_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let file_path = client
//!     .download_to_file("https://example.com/episode.mp4", Path::new("./downloads"))
//!     .await?;
//! println!("Downloaded: {}", file_path.display());
//! # Ok(())
//! # }
//! ```

pub mod accelerator;
mod client;
mod constants;
mod engine;
mod error;
mod filename;
pub mod hls;
pub mod rate_limiter;
mod retry;

pub use accelerator::{Accelerator, AcceleratorError, DEFAULT_ACCELERATOR_BINARY};
pub use client::{BROWSER_USER_AGENT, DownloadFileResult, HttpClient};
pub use engine::{DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError};
pub use error::DownloadError;
pub use filename::build_preferred_filename;
pub use hls::{DEFAULT_SEGMENT_CONCURRENCY, HlsError};
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};

// Note: Per project-context.md, we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
