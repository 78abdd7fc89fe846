//! Shared User-Agent strings for download and plugin HTTP clients.
//!
//! Single source for project URL and UA format so download and plugin
//! traffic stay consistent and easy to update (good citizenship; RFC 9308).

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/animedl/animedl";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("animedl/{version} (episode-downloader; +{PROJECT_UA_URL})")
}

/// Default User-Agent for plugin requests (single shared format; no per-plugin name in header).
#[must_use]
pub(crate) fn default_resolver_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("animedl/{version} (source-plugin; +{PROJECT_UA_URL})")
}
