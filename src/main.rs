//! CLI entry point for the episode-downloader tool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};

use animedl_core::cli::{Args, Command};
use animedl_core::model::{DownloadStatus, DownloadTask, Episode, SourceConfig};
use animedl_core::plugin::api_walk::ApiWalkPlugin;
use animedl_core::plugin::headless::{HeadlessBrowser, HeadlessBrowserConfig};
use animedl_core::plugin::headless_capture::HeadlessCapturePlugin;
use animedl_core::plugin::sample::SamplePlugin;
use animedl_core::plugin::{Plugin, build_plugin_http_client};
use animedl_core::search::{self, SearchOptions};
use animedl_core::{Accelerator, DownloadEngine, HttpClient, PluginRegistry, RateLimiter, RetryPolicy};

/// Builds the registry of compiled-in plugins. There is no configuration
/// file to discover plugins from; this is the fixed set the binary ships
/// with.
fn build_registry() -> PluginRegistry {
    let api_walk_client = Arc::new(build_plugin_http_client());
    let browser = Arc::new(HeadlessBrowser::new(HeadlessBrowserConfig::default()));

    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(SamplePlugin::new()),
        Arc::new(ApiWalkPlugin::new(
            "https://api-walk.example.invalid",
            api_walk_client,
        )),
        Arc::new(HeadlessCapturePlugin::new(
            "https://headless-capture.example.invalid",
            browser,
        )),
    ];

    PluginRegistry::with_config(plugins, &SourceConfig::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags.
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("animedl starting");

    let registry = build_registry();

    match args.command {
        Command::Search { query, source, limit } => {
            let options = SearchOptions {
                limit,
                ..SearchOptions::default()
            };
            let results = search::search(&registry, &query, source.as_deref(), &options)
                .await
                .context("search failed")?;

            if results.is_empty() {
                info!("No results found.");
            }
            for result in &results {
                println!(
                    "[{}] {} - {} ({} episodes, rating {})",
                    result.source,
                    result.title,
                    result.url,
                    result
                        .episode_count
                        .map_or_else(|| "?".to_string(), |n| n.to_string()),
                    result
                        .rating
                        .map_or_else(|| "?".to_string(), |r| format!("{r:.1}")),
                );
            }
        }

        Command::Episodes { anime_url, source } => {
            let plugin = plugin_for_source(&registry, &source)?;
            let episodes = plugin
                .episodes(&anime_url)
                .await
                .with_context(|| format!("failed to list episodes from {source}"))?;

            for episode in &episodes {
                println!(
                    "#{:>3} {} [{}]{}",
                    episode.number,
                    episode.title.as_deref().unwrap_or("(untitled)"),
                    episode
                        .quality_options
                        .iter()
                        .map(|q| q.label())
                        .collect::<Vec<_>>()
                        .join(", "),
                    if episode.is_filler { " (filler)" } else { "" },
                );
            }
        }

        Command::Resolve { episode_url, source, quality } => {
            let plugin = plugin_for_source(&registry, &source)?;
            let resolved = plugin
                .resolve_stream(&episode_url, quality)
                .await
                .with_context(|| format!("failed to resolve stream from {source}"))?;

            println!("{}", resolved.url);
            if resolved.is_hls {
                println!("(HLS playlist)");
            }
        }

        Command::Download { episode_url, source, quality, output } => {
            // Validated up front so an unknown `--source` fails fast with a
            // clear message instead of surfacing from inside the engine.
            plugin_for_source(&registry, &source)?;
            let output_dir = output.unwrap_or_else(|| PathBuf::from("."));

            // The engine re-resolves the stream itself; this task only
            // needs to carry enough of an `Episode` to name the URL and
            // requested quality.
            let episode = Episode::new(
                0,
                None,
                episode_url.clone(),
                source.clone(),
                vec![quality],
                false,
                None,
                None,
                None,
                None,
            )
            .context("invalid synthetic episode for requested download")?;

            let task = DownloadTask::new(0, source.clone(), episode, quality, output_dir.clone());

            let rate_limiter = if args.rate_limit == 0 {
                debug!("rate limiting disabled");
                Arc::new(RateLimiter::disabled())
            } else {
                debug!(rate_limit_ms = args.rate_limit, "rate limiting enabled");
                Arc::new(RateLimiter::new(Duration::from_millis(args.rate_limit)))
            };
            let retry_policy = RetryPolicy::with_max_attempts(u32::from(args.max_retries));
            let accelerator = Arc::new(Accelerator::detect(None));
            let client = HttpClient::new();

            let engine = DownloadEngine::new(
                usize::from(args.concurrency),
                retry_policy,
                rate_limiter,
                accelerator,
            )?;

            let (stats, tasks) = engine
                .process_tasks(vec![task], &registry, &client, &output_dir, None)
                .await
                .context("download engine failed")?;

            let task = tasks
                .into_iter()
                .next()
                .context("download engine returned no tasks")?;

            match task.status {
                DownloadStatus::Completed => {
                    println!("Downloaded to {}", task.output_path.display());
                }
                _ => {
                    bail!(
                        "download failed: {}",
                        task.error.unwrap_or_else(|| "unknown error".to_string())
                    );
                }
            }

            info!(
                completed = stats.completed(),
                failed = stats.failed(),
                retried = stats.retried(),
                "download batch finished"
            );
        }
    }

    Ok(())
}

/// Looks up the single active plugin named `source`.
fn plugin_for_source(registry: &PluginRegistry, source: &str) -> Result<Arc<dyn Plugin>> {
    registry
        .plugin_handle(source)
        .with_context(|| format!("unknown source: {source}"))
}
