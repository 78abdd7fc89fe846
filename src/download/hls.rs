//! HLS (`.m3u8`) stream assembly.
//!
//! Grounded in `aniplux/core/downloader.py::_download_hls_stream` for
//! behavior; parsing via `m3u8-rs`, the crate the retrieval pack's
//! closest-domain repos reach for (none of the five teacher-eligible repos
//! need HLS).

use std::collections::BTreeMap;
use std::path::Path;

use m3u8_rs::{MediaPlaylist, Playlist, VariantStream};
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::model::Quality;

/// Default number of segments fetched concurrently.
pub const DEFAULT_SEGMENT_CONCURRENCY: usize = 4;

/// Failures specific to HLS assembly.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not parse playlist at {url}")]
    InvalidPlaylist { url: String },

    #[error("playlist at {url} has no variants or segments")]
    EmptyPlaylist { url: String },

    #[error("IO error writing {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Picks the variant whose bandwidth best matches `requested`, falling back
/// to the highest-bandwidth variant at or below the requested ceiling,
/// mirroring the quality-fallback policy in [`crate::model::Episode`].
fn select_variant(variants: &[VariantStream], requested: Quality) -> Option<&VariantStream> {
    if variants.is_empty() {
        return None;
    }

    // Map quality tiers to an approximate bandwidth ceiling (bits/sec), the
    // same ladder used to bucket stream quality elsewhere in this crate.
    let ceiling_bps: u64 = match requested {
        Quality::Low => 1_500_000,
        Quality::Medium => 3_500_000,
        Quality::High => 8_000_000,
        Quality::Ultra => 16_000_000,
        Quality::FourK => u64::MAX,
    };

    variants
        .iter()
        .filter(|v| v.bandwidth <= ceiling_bps)
        .max_by_key(|v| v.bandwidth)
        .or_else(|| variants.iter().min_by_key(|v| v.bandwidth))
}

/// Parses `master_or_media` and, if it's a master playlist, resolves the
/// best matching variant's media-playlist URL. Returns the media playlist
/// URL to actually fetch segments from (may be the input URL itself).
#[instrument(skip(client))]
pub async fn resolve_media_playlist_url(
    client: &Client,
    playlist_url: &str,
    requested: Quality,
) -> Result<String, HlsError> {
    let body = fetch_text(client, playlist_url).await?;
    let parsed = m3u8_rs::parse_playlist_res(body.as_bytes()).map_err(|_| HlsError::InvalidPlaylist {
        url: playlist_url.to_string(),
    })?;

    match parsed {
        Playlist::MasterPlaylist(master) => {
            let variant = select_variant(&master.variants, requested).ok_or_else(|| {
                HlsError::EmptyPlaylist {
                    url: playlist_url.to_string(),
                }
            })?;
            Ok(resolve_relative(playlist_url, &variant.uri))
        }
        Playlist::MediaPlaylist(_) => Ok(playlist_url.to_string()),
    }
}

/// Resolves `maybe_relative` against `base`, returning it unchanged if
/// it's already absolute.
fn resolve_relative(base: &str, maybe_relative: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(maybe_relative))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| maybe_relative.to_string())
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, HlsError> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| HlsError::Network {
            url: url.to_string(),
            source: e,
        })?
        .text()
        .await
        .map_err(|e| HlsError::Network {
            url: url.to_string(),
            source: e,
        })
}

/// Progress callback invoked after each segment lands (segments downloaded
/// so far, total segments once known).
pub type ProgressFn<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

/// Downloads every segment of the media playlist at `media_playlist_url`
/// and reassembles them, in order, into `output_path`.
///
/// Segment fetches run with bounded concurrency
/// (`segment_concurrency`); a segment that finishes out of order is held
/// in a reorder buffer until its predecessors have been written.
#[instrument(skip(client, on_progress), fields(segment_concurrency))]
pub async fn download_hls_stream(
    client: &Client,
    media_playlist_url: &str,
    output_path: &Path,
    segment_concurrency: usize,
    on_progress: &ProgressFn<'_>,
) -> Result<(), HlsError> {
    let body = fetch_text(client, media_playlist_url).await?;
    let parsed = m3u8_rs::parse_media_playlist_res(body.as_bytes()).map_err(|_| {
        HlsError::InvalidPlaylist {
            url: media_playlist_url.to_string(),
        }
    })?;

    download_media_playlist(client, media_playlist_url, &parsed, output_path, segment_concurrency, on_progress)
        .await
}

async fn download_media_playlist(
    client: &Client,
    base_url: &str,
    playlist: &MediaPlaylist,
    output_path: &Path,
    segment_concurrency: usize,
    on_progress: &ProgressFn<'_>,
) -> Result<(), HlsError> {
    if playlist.segments.is_empty() {
        return Err(HlsError::EmptyPlaylist {
            url: base_url.to_string(),
        });
    }

    let total = playlist.segments.len() as u64;
    let semaphore = Semaphore::new(segment_concurrency.max(1));
    let mut handles = Vec::with_capacity(playlist.segments.len());

    for (index, segment) in playlist.segments.iter().enumerate() {
        let url = resolve_relative(base_url, &segment.uri);
        let client = client.clone();
        let permit_source = &semaphore;
        handles.push(async move {
            #[allow(clippy::expect_used)]
            let _permit = permit_source.acquire().await.expect("semaphore not closed");
            let bytes = client
                .get(&url)
                .send()
                .await
                .map_err(|e| HlsError::Network { url: url.clone(), source: e })?
                .bytes()
                .await
                .map_err(|e| HlsError::Network { url: url.clone(), source: e })?;
            Ok::<(usize, Vec<u8>), HlsError>((index, bytes.to_vec()))
        });
    }

    let results = futures_util::future::join_all(handles).await;

    // Reorder buffer: collect into a BTreeMap keyed by segment index so
    // out-of-order completions are written in playlist order regardless of
    // fetch completion order.
    let mut ordered: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
    for result in results {
        let (index, bytes) = result?;
        ordered.insert(index, bytes);
    }

    let mut file = tokio::fs::File::create(output_path)
        .await
        .map_err(|e| HlsError::Io {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    let mut done = 0u64;
    for (_, bytes) in ordered {
        file.write_all(&bytes).await.map_err(|e| HlsError::Io {
            path: output_path.to_path_buf(),
            source: e,
        })?;
        done += 1;
        on_progress(done, Some(total));
    }

    debug!(segments = total, "HLS stream assembled");
    Ok(())
}

/// Indeterminate-progress heuristic used while the total segment count
/// (and therefore total size) isn't yet knowable.
///
/// Grounded verbatim in `aniplux/core/downloader.py::monitor_file_progress`.
/// Presentation-only: never drives a `DownloadTask` to `Completed`.
#[must_use]
pub fn indeterminate_progress_percent(megabytes_downloaded: f64) -> f32 {
    #[allow(clippy::cast_possible_truncation)]
    let percent = (megabytes_downloaded * 2.0).min(95.0) as f32;
    percent
}
