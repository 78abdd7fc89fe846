//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};

use crate::download::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use crate::model::Quality;

/// Search, list, and download anime episodes from multiple sources concurrently.
#[derive(Parser, Debug)]
#[command(name = "animedl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, global = true, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, global = true, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Minimum delay between requests to same domain in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, global = true, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands exposed by the CLI. Each is a thin consumer of the core
/// library: no business logic lives here.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search for anime across active sources.
    Search {
        /// Query text. Empty matches everything a plugin offers.
        query: String,

        /// Restrict the search to one source. Searches all active sources when omitted.
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List episodes for an anime at the given source URL.
    Episodes {
        /// The anime's listing URL, as returned by `search`.
        anime_url: String,

        /// Which source this URL belongs to.
        #[arg(long)]
        source: String,
    },

    /// Download a single episode.
    Download {
        /// The episode's URL, as returned by `episodes`.
        episode_url: String,

        /// Which source this URL belongs to.
        #[arg(long)]
        source: String,

        /// Desired quality. Falls back to the best quality at or below this.
        #[arg(long, default_value = "high")]
        quality: Quality,

        /// Directory to save the downloaded file in (defaults to the current directory).
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },

    /// Resolve a direct stream URL without downloading it.
    Resolve {
        /// The episode's URL, as returned by `episodes`.
        episode_url: String,

        /// Which source this URL belongs to.
        #[arg(long)]
        source: String,

        /// Desired quality. Falls back to the best quality at or below this.
        #[arg(long, default_value = "high")]
        quality: Quality,
    },
}
