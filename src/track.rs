//! Track records shared by the API, the SEO pages and the sitemap.
//!
//! Field names follow what the SPA already consumes, hence the camelCase
//! serialization.

use serde::{Deserialize, Serialize};

/// Slug bases are cut to this many characters before the video id is added.
const SLUG_BASE_MAX_LEN: usize = 15;

/// Size marker YouTube Music uses for list thumbnails.
const SMALL_THUMBNAIL_MARKER: &str = "w60-h60";
const UPSCALED_SIZES: [u32; 3] = [120, 400, 600];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Metadata for one track. This is everything the SEO page needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub video_id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub artists: String,
    pub duration: String,
    pub plays_count: Option<String>,
    #[serde(default)]
    pub images: Vec<Thumbnail>,
}

/// Full player payload: metadata plus the ids the player needs to queue the
/// next track and load lyrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDetails {
    #[serde(flatten)]
    pub track: TrackRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_id: Option<String>,
}

impl From<TrackRecord> for TrackDetails {
    fn from(track: TrackRecord) -> Self {
        Self {
            track,
            playlist_id: None,
            browse_id: None,
        }
    }
}

/// Builds the `/music/{slug}` segment for a track: a short readable base from
/// the title, then `_`, then the video id.
pub fn make_slug(title: &str, video_id: &str) -> String {
    format!("{}_{video_id}", slug_base(title))
}

fn slug_base(title: &str) -> String {
    let mut base = String::new();
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !base.is_empty() {
                base.push('-');
            }
            pending_dash = false;
            base.push(ch);
        } else {
            pending_dash = true;
        }
    }
    let truncated: String = base.chars().take(SLUG_BASE_MAX_LEN).collect();
    truncated.trim_matches('-').to_string()
}

/// Recovers the video id from a slug. Slug bases never contain `_` but video
/// ids can, so everything after the first underscore belongs to the id.
pub fn video_id_from_slug(slug: &str) -> Option<&str> {
    let id = slug.split_once('_').map_or(slug, |(_, id)| id);
    if id.is_empty() { None } else { Some(id) }
}

/// `MM:SS`, or `H:MM:SS` once a track reaches an hour.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Short play counts in the style of en-US compact notation (`1.2K`, `34M`).
pub fn format_compact_count(count: u64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e3, "K"), (1e6, "M"), (1e9, "B"), (1e12, "T")];

    let Some(mut index) = UNITS.iter().rposition(|(size, _)| count as f64 >= *size) else {
        return count.to_string();
    };

    loop {
        let (size, suffix) = UNITS[index];
        let scaled = count as f64 / size;
        if scaled < 10.0 {
            let rounded = (scaled * 10.0).round() / 10.0;
            if rounded < 10.0 {
                let text = format!("{rounded:.1}");
                let text = text.strip_suffix(".0").unwrap_or(&text);
                return format!("{text}{suffix}");
            }
            return format!("10{suffix}");
        }
        let rounded = scaled.round();
        if rounded >= 1000.0 && index + 1 < UNITS.len() {
            index += 1;
            continue;
        }
        return format!("{rounded:.0}{suffix}");
    }
}

/// Search results only carry 60px thumbnails. The same image is served at
/// larger sizes by rewriting the size marker, so each small thumbnail expands
/// into four entries. Thumbnails without the marker are dropped.
pub fn expand_thumbnails(thumbnails: Vec<Thumbnail>) -> Vec<Thumbnail> {
    let mut expanded = Vec::with_capacity(thumbnails.len() * 4);
    for thumbnail in thumbnails {
        if !thumbnail.url.contains(SMALL_THUMBNAIL_MARKER) {
            continue;
        }
        let variants: Vec<Thumbnail> = UPSCALED_SIZES
            .iter()
            .map(|size| Thumbnail {
                url: thumbnail
                    .url
                    .replacen(SMALL_THUMBNAIL_MARKER, &format!("w{size}-h{size}"), 1),
                width: Some(*size),
                height: Some(*size),
            })
            .collect();
        expanded.push(thumbnail);
        expanded.extend(variants);
    }
    expanded
}
