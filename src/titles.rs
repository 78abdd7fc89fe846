//! Cosmetic, best-effort anime-title inference from a URL.
//!
//! Grounded in `aniplux/core/utils.py::extract_anime_title_from_url`.
//! Never called from the plugin/search/download core — display layer only,
//! so a wrong guess here never affects resolution or dedup correctness.

/// Titles whose official English release name differs enough from a
/// slugified URL segment that a literal word-split produces something
/// unrecognizable. Ported verbatim from the original's special-case table.
const SPECIAL_CASES: &[(&str, &str)] = &[
    ("kimetsu-no-yaiba", "Demon Slayer"),
    ("shingeki-no-kyojin", "Attack on Titan"),
    ("boku-no-hero-academia", "My Hero Academia"),
];

/// Infers a human-friendly title from the last path segment of `url`.
///
/// Best-effort only: returns `None` if `url` has no usable path segment.
#[must_use]
pub fn infer_from_url(url: &str) -> Option<String> {
    let slug = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())?;

    let slug = strip_trailing_id_suffix(slug);

    if let Some((_, title)) = SPECIAL_CASES.iter().find(|(key, _)| *key == slug) {
        return Some((*title).to_string());
    }

    let title = slug
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    (!title.is_empty()).then_some(title)
}

/// Strips a trailing numeric id segment some sites append, e.g.
/// `attack-on-titan-123` -> `attack-on-titan`.
fn strip_trailing_id_suffix(slug: &str) -> &str {
    match slug.rsplit_once('-') {
        Some((prefix, suffix)) if !prefix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) => {
            prefix
        }
        _ => slug,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
