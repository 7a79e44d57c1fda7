//! Client for YouTube Music's internal `youtubei/v1` API.
//!
//! Every call is a blocking `ureq` request; async callers run them through
//! `spawn_blocking`. Response parsing is kept in free functions so it can be
//! exercised against captured payloads without any network.

use std::{sync::LazyLock, thread, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use rand_core::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Upstreams;
use crate::track::{
    Thumbnail, TrackRecord, expand_thumbnails, format_compact_count, format_duration, make_slug,
};

pub const CLIENT_NAME: &str = "WEB_REMIX";
pub const CLIENT_VERSION: &str = "1.20250317.01.00";

/// Search params that restrict results to the "Songs" shelf.
const SONGS_FILTER_PARAMS: &str = "EgWKAQIIAWoSEAMQBBAJEA4QChAFEBEQEBAV";
const WATCH_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const ARTIST_SEPARATOR: &str = " • ";
const FALLBACK_DURATION: &str = "0:00";

pub const LYRICS_UNAVAILABLE: &str = "No lyrics available for this song.";
pub const LYRICS_LOAD_FAILED: &str = "Couldn't load the lyrics for this song.";

static PLAYER_RESPONSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var ytInitialPlayerResponse = (.*?);\s*</script>")
        .expect("player response pattern is valid")
});

const WATCH_NEXT_TABS: &str =
    "/contents/singleColumnMusicWatchNextResultsRenderer/tabbedRenderer/watchNextTabbedResultsRenderer/tabs";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub artists: String,
    pub plays_count: Option<String>,
    pub images: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub continuation: Option<String>,
}

/// Ids taken from the watch-next panel of a track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedIds {
    pub playlist_id: Option<String>,
    pub browse_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTrack {
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub suggestion_text: String,
    pub suggestion_query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suggestions {
    pub results: Vec<Suggestion>,
}

#[derive(Deserialize)]
struct OEmbed {
    #[serde(default)]
    title: String,
}

#[derive(Clone)]
pub struct YtMusicClient {
    agent: ureq::Agent,
    ytmusic_base: String,
    youtube_base: String,
}

impl YtMusicClient {
    pub fn new(upstreams: &Upstreams) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            ytmusic_base: upstreams.ytmusic.clone(),
            youtube_base: upstreams.youtube.clone(),
        }
    }

    /// POSTs `body` to an internal endpoint with the web-remix client context
    /// merged in.
    fn call(&self, endpoint: &str, mut body: Value) -> Result<Value> {
        body["context"] = json!({
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
            }
        });
        let url = format!("{}/youtubei/v1/{endpoint}", self.ytmusic_base);
        let response = self
            .agent
            .post(&url)
            .query("prettyPrint", "false")
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => anyhow!("YT Music API error: {code}"),
                other => anyhow!(other).context(format!("calling {endpoint}")),
            })?;
        response
            .into_json::<Value>()
            .with_context(|| format!("decoding {endpoint} response"))
    }

    pub fn search(&self, term: Option<&str>, continuation: Option<&str>) -> Result<SearchPage> {
        let payload = self.call("search", search_request(term, continuation)?)?;
        Ok(parse_search_page(&payload))
    }

    /// Resolves metadata for a single track. The watch page carries the full
    /// player response; when YouTube serves a page without it the track is
    /// rebuilt from oEmbed plus a search for the id. `Ok(None)` means neither
    /// source knows the track.
    pub fn track_metadata(&self, video_id: &str) -> Result<Option<TrackRecord>> {
        let from_watch_page = match self.watch_page(video_id) {
            Ok(html) => extract_player_response(&html)
                .and_then(|player| track_from_player_response(video_id, &player)),
            Err(err) => {
                debug!(video_id, error = %err, "watch page unavailable");
                None
            }
        };
        if let Some(track) = from_watch_page {
            return Ok(Some(track));
        }

        let (title, page) = thread::scope(|scope| {
            let oembed = scope.spawn(|| self.oembed_title(video_id));
            let page = self.search(Some(video_id), None);
            let title = oembed.join().ok().flatten();
            (title, page)
        });
        Ok(track_from_search_fallback(video_id, title, &page?))
    }

    fn watch_page(&self, video_id: &str) -> Result<String> {
        let url = format!("{}/watch", self.ytmusic_base);
        let response = self
            .agent
            .get(&url)
            .query("v", video_id)
            .set("User-Agent", WATCH_USER_AGENT)
            .call()
            .context("fetching watch page")?;
        response.into_string().context("reading watch page")
    }

    fn oembed_title(&self, video_id: &str) -> Option<String> {
        let url = format!("{}/oembed", self.youtube_base);
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        let response = self
            .agent
            .get(&url)
            .query("url", &watch_url)
            .query("format", "json")
            .call()
            .ok()?;
        let oembed: OEmbed = response.into_json().ok()?;
        Some(oembed.title).filter(|title| !title.is_empty())
    }

    /// Playlist and lyrics ids for a track. Missing data only means the player
    /// cannot queue or show lyrics, so failures collapse to `None`.
    pub fn related(&self, video_id: &str) -> Option<RelatedIds> {
        match self.call("next", json!({ "videoId": video_id })) {
            Ok(payload) => parse_related_ids(&payload),
            Err(err) => {
                debug!(video_id, error = %err, "related ids unavailable");
                None
            }
        }
    }

    pub fn next_track(
        &self,
        video_id: &str,
        playlist_id: &str,
        played_ids: &[String],
        rng: &mut impl RngCore,
    ) -> Result<NextTrack> {
        let payload = self.call("next", next_request(video_id, playlist_id, played_ids))?;
        let candidates = next_candidates(&payload, played_ids)?;
        Ok(NextTrack {
            video_id: pick_random(candidates, rng),
        })
    }

    pub fn lyrics(&self, browse_id: &str) -> Result<String> {
        if browse_id.is_empty() {
            return Ok(LYRICS_UNAVAILABLE.to_string());
        }
        let payload = self.call("browse", json!({ "browseId": browse_id }))?;
        Ok(parse_lyrics(&payload))
    }

    pub fn suggestions(&self, term: &str) -> Result<Suggestions> {
        if term.is_empty() {
            return Ok(Suggestions::default());
        }
        let payload = self.call("music/get_search_suggestions", json!({ "input": term }))?;
        Ok(Suggestions {
            results: parse_suggestions(&payload),
        })
    }
}

/// A continuation token alone selects the next page of an earlier search.
pub fn search_request(term: Option<&str>, continuation: Option<&str>) -> Result<Value> {
    match (continuation, term) {
        (Some(token), _) => Ok(json!({ "continuation": token })),
        (None, Some(term)) => Ok(json!({ "query": term, "params": SONGS_FILTER_PARAMS })),
        (None, None) => bail!("search needs a term or a continuation token"),
    }
}

pub fn next_request(video_id: &str, playlist_id: &str, played_ids: &[String]) -> Value {
    let mut body = json!({ "videoId": video_id, "playlistId": playlist_id });
    if !played_ids.is_empty() {
        body["playedTrackIds"] = Value::String(played_ids.join(","));
    }
    body
}

/// Splits the comma-separated `playedTrackIds` query value.
pub fn parse_played_ids(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn runs_text(runs: Option<&Value>) -> String {
    runs.and_then(Value::as_array)
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn thumbnails_at(value: &Value, pointer: &str) -> Vec<Thumbnail> {
    value
        .pointer(pointer)
        .cloned()
        .and_then(|list| serde_json::from_value(list).ok())
        .unwrap_or_default()
}

pub fn parse_search_page(payload: &Value) -> SearchPage {
    let shelf = payload
        .pointer("/continuationContents/musicShelfContinuation")
        .or_else(|| {
            payload
                .pointer(
                    "/contents/tabbedSearchResultsRenderer/tabs/0/tabRenderer/content/sectionListRenderer/contents",
                )
                .and_then(Value::as_array)
                .and_then(|sections| {
                    sections
                        .iter()
                        .find_map(|section| section.get("musicShelfRenderer"))
                })
        });
    let Some(shelf) = shelf else {
        return SearchPage::default();
    };

    let results = shelf
        .get("contents")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("musicResponsiveListItemRenderer"))
                .filter_map(parse_search_item)
                .collect()
        })
        .unwrap_or_default();
    let continuation = text_at(shelf, "/continuations/0/nextContinuationData/continuation")
        .map(str::to_string);

    SearchPage {
        results,
        continuation,
    }
}

fn parse_search_item(item: &Value) -> Option<SearchResult> {
    let video_id = text_at(item, "/playlistItemData/videoId")?.to_string();
    let column = |index: usize| {
        item.pointer(&format!(
            "/flexColumns/{index}/musicResponsiveListItemFlexColumnRenderer/text/runs"
        ))
    };
    let title = column(0)
        .and_then(|runs| runs.pointer("/0/text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let artists = runs_text(column(1));
    let plays_count = column(2)
        .and_then(|runs| runs.pointer("/0/text"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let images = expand_thumbnails(thumbnails_at(
        item,
        "/thumbnail/musicThumbnailRenderer/thumbnail/thumbnails",
    ));

    Some(SearchResult {
        video_id,
        title,
        artists,
        plays_count,
        images,
    })
}

/// Pulls the inline `ytInitialPlayerResponse` JSON out of a watch page.
pub fn extract_player_response(html: &str) -> Option<Value> {
    let captures = PLAYER_RESPONSE_RE.captures(html)?;
    match serde_json::from_str(captures.get(1)?.as_str()) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "player response is not valid JSON");
            None
        }
    }
}

pub fn track_from_player_response(video_id: &str, player: &Value) -> Option<TrackRecord> {
    let details = player.get("videoDetails")?;
    let title = details.get("title").and_then(Value::as_str)?.to_string();
    if title.is_empty() {
        return None;
    }

    let keywords = details
        .get("keywords")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    // The description of auto-generated music uploads starts with a
    // "Provided to YouTube" line followed by "Title · Artist".
    let artists = details
        .get("shortDescription")
        .and_then(Value::as_str)
        .and_then(|description| {
            description
                .lines()
                .filter(|line| !line.trim().is_empty())
                .nth(1)
        })
        .unwrap_or_default()
        .to_string();
    let duration = format_duration(number_field(details, "lengthSeconds").unwrap_or(0));
    let plays_count = number_field(details, "viewCount").map(format_compact_count);
    let images = thumbnails_at(details, "/thumbnail/thumbnails");

    Some(TrackRecord {
        video_id: video_id.to_string(),
        slug: make_slug(&title, video_id),
        title,
        keywords,
        artists,
        duration,
        plays_count,
        images,
    })
}

/// YouTube encodes counters as strings; accept either form.
fn number_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

pub fn track_from_search_fallback(
    video_id: &str,
    oembed_title: Option<String>,
    page: &SearchPage,
) -> Option<TrackRecord> {
    let found = page
        .results
        .iter()
        .find(|result| result.video_id == video_id)
        .or_else(|| page.results.first())?;

    // Song rows read "Artist • Artist • 3:45"; the last part is the length.
    let mut parts: Vec<&str> = found.artists.split(ARTIST_SEPARATOR).collect();
    let duration = if parts.len() > 1 {
        parts.pop().unwrap_or(FALLBACK_DURATION)
    } else {
        FALLBACK_DURATION
    };
    let artists = parts.join(ARTIST_SEPARATOR);
    let title = oembed_title.unwrap_or_else(|| found.title.clone());

    Some(TrackRecord {
        video_id: video_id.to_string(),
        slug: make_slug(&title, video_id),
        title,
        keywords: Vec::new(),
        artists,
        duration: duration.to_string(),
        plays_count: found.plays_count.clone(),
        images: found.images.clone(),
    })
}

fn find_tab<'a>(payload: &'a Value, title: &str) -> Option<&'a Value> {
    payload
        .pointer(WATCH_NEXT_TABS)
        .and_then(Value::as_array)?
        .iter()
        .find(|tab| text_at(tab, "/tabRenderer/title") == Some(title))
}

pub fn parse_related_ids(payload: &Value) -> Option<RelatedIds> {
    if payload.get("contents").is_none() || payload.get("currentVideoEndpoint").is_none() {
        return None;
    }
    let playlist_id = find_tab(payload, "Up next")
        .and_then(|tab| {
            text_at(
                tab,
                "/tabRenderer/content/musicQueueRenderer/content/playlistPanelRenderer/contents/1/automixPreviewVideoRenderer/content/automixPlaylistVideoRenderer/navigationEndpoint/watchPlaylistEndpoint/playlistId",
            )
        })
        .map(str::to_string);
    let browse_id = find_tab(payload, "Lyrics")
        .and_then(|tab| text_at(tab, "/tabRenderer/endpoint/browseEndpoint/browseId"))
        .map(str::to_string);
    Some(RelatedIds {
        playlist_id,
        browse_id,
    })
}

/// Queue entries that have not been played yet.
pub fn next_candidates(payload: &Value, played_ids: &[String]) -> Result<Vec<String>> {
    let queue = payload
        .pointer(&format!(
            "{WATCH_NEXT_TABS}/0/tabRenderer/content/musicQueueRenderer/content/playlistPanelRenderer/contents"
        ))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("No playlist available"))?;

    Ok(queue
        .iter()
        .filter_map(|item| item.get("playlistPanelVideoRenderer"))
        .filter(|renderer| {
            text_at(renderer, "/videoId")
                .is_none_or(|id| !played_ids.iter().any(|played| played == id))
        })
        .filter_map(|renderer| {
            text_at(renderer, "/navigationEndpoint/watchEndpoint/videoId")
                .or_else(|| text_at(renderer, "/videoId"))
                .map(str::to_string)
        })
        .collect())
}

pub fn pick_random(mut candidates: Vec<String>, rng: &mut impl RngCore) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let index = (rng.next_u64() % candidates.len() as u64) as usize;
    Some(candidates.swap_remove(index))
}

pub fn parse_lyrics(payload: &Value) -> String {
    text_at(
        payload,
        "/contents/sectionListRenderer/contents/0/musicDescriptionShelfRenderer/description/runs/0/text",
    )
    .filter(|text| !text.is_empty())
    .unwrap_or(LYRICS_LOAD_FAILED)
    .to_string()
}

pub fn parse_suggestions(payload: &Value) -> Vec<Suggestion> {
    payload
        .pointer("/contents/0/searchSuggestionsSectionRenderer/contents")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("searchSuggestionRenderer"))
                .filter_map(|renderer| {
                    // First run only: it is the highlighted prefix the client
                    // strips from the query to show the completion.
                    let text = text_at(renderer, "/suggestion/runs/0/text")?;
                    let query = text_at(renderer, "/navigationEndpoint/searchEndpoint/query")?;
                    if text.is_empty() || query.is_empty() {
                        return None;
                    }
                    Some(Suggestion {
                        suggestion_text: text.to_string(),
                        suggestion_query: query.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic stand-in for `OsRng`.
    struct FixedRng(u64);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn song_row(video_id: &str, title: &str, artists: &[&str], plays: Option<&str>) -> Value {
        let mut columns = vec![
            json!({ "musicResponsiveListItemFlexColumnRenderer": { "text": { "runs": [{ "text": title }] } } }),
            json!({ "musicResponsiveListItemFlexColumnRenderer": { "text": {
                "runs": artists.iter().map(|text| json!({ "text": text })).collect::<Vec<_>>()
            } } }),
        ];
        if let Some(plays) = plays {
            columns.push(json!({ "musicResponsiveListItemFlexColumnRenderer": { "text": { "runs": [{ "text": plays }] } } }));
        }
        json!({
            "musicResponsiveListItemRenderer": {
                "playlistItemData": { "videoId": video_id },
                "flexColumns": columns,
                "thumbnail": { "musicThumbnailRenderer": { "thumbnail": { "thumbnails": [
                    { "url": format!("https://img.test/{video_id}=w60-h60-l90"), "width": 60, "height": 60 }
                ] } } }
            }
        })
    }

    fn search_payload(rows: Vec<Value>, continuation: Option<&str>) -> Value {
        let mut shelf = json!({ "contents": rows });
        if let Some(token) = continuation {
            shelf["continuations"] = json!([{ "nextContinuationData": { "continuation": token } }]);
        }
        json!({
            "contents": { "tabbedSearchResultsRenderer": { "tabs": [{ "tabRenderer": { "content": {
                "sectionListRenderer": { "contents": [
                    { "itemSectionRenderer": {} },
                    { "musicShelfRenderer": shelf }
                ] }
            } } }] } }
        })
    }

    fn watch_next_payload(queue: Vec<Value>) -> Value {
        json!({
            "currentVideoEndpoint": { "watchEndpoint": { "videoId": "cur" } },
            "contents": { "singleColumnMusicWatchNextResultsRenderer": { "tabbedRenderer": {
                "watchNextTabbedResultsRenderer": { "tabs": [
                    { "tabRenderer": { "title": "Up next", "content": { "musicQueueRenderer": { "content": {
                        "playlistPanelRenderer": { "contents": queue }
                    } } } } },
                    { "tabRenderer": { "title": "Lyrics", "endpoint": { "browseEndpoint": { "browseId": "MPLYt_lyrics" } } } }
                ] }
            } } }
        })
    }

    fn queue_item(video_id: &str) -> Value {
        json!({ "playlistPanelVideoRenderer": {
            "videoId": video_id,
            "navigationEndpoint": { "watchEndpoint": { "videoId": video_id } }
        } })
    }

    #[test]
    fn search_page_reads_song_shelf() {
        let payload = search_payload(
            vec![
                song_row("a1", "First", &["Artist", " • ", "3:10"], Some("1.2M plays")),
                json!({ "musicResponsiveListItemRenderer": { "flexColumns": [] } }),
                song_row("b2", "Second", &["Other"], None),
            ],
            Some("token-2"),
        );
        let page = parse_search_page(&payload);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.continuation.as_deref(), Some("token-2"));

        let first = &page.results[0];
        assert_eq!(first.video_id, "a1");
        assert_eq!(first.title, "First");
        assert_eq!(first.artists, "Artist • 3:10");
        assert_eq!(first.plays_count.as_deref(), Some("1.2M plays"));
        assert_eq!(first.images.len(), 4);
        assert!(page.results[1].plays_count.is_none());
    }

    #[test]
    fn search_page_reads_continuation_shelf() {
        let payload = json!({
            "continuationContents": { "musicShelfContinuation": {
                "contents": [song_row("c3", "Third", &["Band"], None)]
            } }
        });
        let page = parse_search_page(&payload);
        assert_eq!(page.results[0].video_id, "c3");
        assert!(page.continuation.is_none());
    }

    #[test]
    fn search_page_without_shelf_is_empty() {
        assert_eq!(parse_search_page(&json!({})), SearchPage::default());
    }

    #[test]
    fn player_response_is_extracted_from_watch_html() {
        let html = r#"<html><script>var ytInitialPlayerResponse = {"videoDetails":{"title":"Song; Part 2","lengthSeconds":"213","viewCount":"1234567","keywords":["pop","live"],"shortDescription":"Provided to YouTube\n\nSong · Singer\n\nLabel","thumbnail":{"thumbnails":[{"url":"https://i.test/1.jpg","width":120,"height":90}]}}};</script><script>other()</script></html>"#;
        let player = extract_player_response(html).unwrap();
        let track = track_from_player_response("vid123", &player).unwrap();
        assert_eq!(track.title, "Song; Part 2");
        assert_eq!(track.slug, "song-part-2_vid123");
        assert_eq!(track.artists, "Song · Singer");
        assert_eq!(track.duration, "03:33");
        assert_eq!(track.plays_count.as_deref(), Some("1.2M"));
        assert_eq!(track.keywords, vec!["pop", "live"]);
        assert_eq!(track.images.len(), 1);
    }

    #[test]
    fn player_response_without_title_is_rejected() {
        assert!(extract_player_response("<html>nothing here</html>").is_none());
        let player = json!({ "playabilityStatus": { "status": "ERROR" } });
        assert!(track_from_player_response("vid", &player).is_none());
    }

    #[test]
    fn fallback_prefers_matching_result_and_splits_duration() {
        let page = SearchPage {
            results: vec![
                SearchResult {
                    video_id: "other".into(),
                    title: "Other".into(),
                    artists: "Nobody • 1:00".into(),
                    plays_count: None,
                    images: vec![],
                },
                SearchResult {
                    video_id: "vid".into(),
                    title: "Search Title".into(),
                    artists: "A • B • 4:05".into(),
                    plays_count: Some("10K plays".into()),
                    images: vec![],
                },
            ],
            continuation: None,
        };
        let track = track_from_search_fallback("vid", Some("OEmbed Title".into()), &page).unwrap();
        assert_eq!(track.title, "OEmbed Title");
        assert_eq!(track.artists, "A • B");
        assert_eq!(track.duration, "4:05");
        assert_eq!(track.plays_count.as_deref(), Some("10K plays"));
        assert_eq!(track.slug, "oembed-title_vid");

        let track = track_from_search_fallback("missing", None, &page).unwrap();
        assert_eq!(track.title, "Other");
        assert_eq!(track.artists, "Nobody");

        let single = SearchPage {
            results: vec![SearchResult {
                video_id: "solo".into(),
                title: "Solo".into(),
                artists: "Just Artist".into(),
                plays_count: None,
                images: vec![],
            }],
            continuation: None,
        };
        let track = track_from_search_fallback("solo", None, &single).unwrap();
        assert_eq!(track.artists, "Just Artist");
        assert_eq!(track.duration, "0:00");
    }

    #[test]
    fn fallback_without_results_finds_nothing() {
        assert!(track_from_search_fallback("vid", None, &SearchPage::default()).is_none());
    }

    #[test]
    fn related_ids_come_from_named_tabs() {
        let payload = watch_next_payload(vec![
            queue_item("cur"),
            json!({ "automixPreviewVideoRenderer": { "content": { "automixPlaylistVideoRenderer": {
                "navigationEndpoint": { "watchPlaylistEndpoint": { "playlistId": "RDAMVMcur" } }
            } } } }),
        ]);
        let related = parse_related_ids(&payload).unwrap();
        assert_eq!(related.playlist_id.as_deref(), Some("RDAMVMcur"));
        assert_eq!(related.browse_id.as_deref(), Some("MPLYt_lyrics"));

        assert!(parse_related_ids(&json!({ "contents": {} })).is_none());
    }

    #[test]
    fn next_candidates_skip_played_tracks() {
        let payload = watch_next_payload(vec![
            queue_item("a"),
            queue_item("b"),
            json!({ "automixPreviewVideoRenderer": {} }),
            queue_item("c"),
        ]);
        let played = parse_played_ids(Some("a, c,"));
        assert_eq!(played, vec!["a", "c"]);
        assert_eq!(next_candidates(&payload, &played).unwrap(), vec!["b"]);
        assert!(next_candidates(&json!({}), &played).is_err());
    }

    #[test]
    fn pick_random_uses_rng_and_handles_empty() {
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            pick_random(candidates.clone(), &mut FixedRng(4)).as_deref(),
            Some("b")
        );
        assert_eq!(pick_random(Vec::new(), &mut FixedRng(0)), None);
    }

    #[test]
    fn lyrics_fall_back_to_message() {
        let payload = json!({ "contents": { "sectionListRenderer": { "contents": [
            { "musicDescriptionShelfRenderer": { "description": { "runs": [{ "text": "la la la" }] } } }
        ] } } });
        assert_eq!(parse_lyrics(&payload), "la la la");
        assert_eq!(parse_lyrics(&json!({})), LYRICS_LOAD_FAILED);
    }

    #[test]
    fn suggestions_keep_first_run_and_drop_incomplete_entries() {
        let payload = json!({ "contents": [{ "searchSuggestionsSectionRenderer": { "contents": [
            { "searchSuggestionRenderer": {
                "suggestion": { "runs": [{ "text": "shape", "bold": true }, { "text": " of you" }] },
                "navigationEndpoint": { "searchEndpoint": { "query": "shape of you" } }
            } },
            { "searchSuggestionRenderer": { "suggestion": { "runs": [{ "text": "no query" }] } } },
            { "historySuggestionRenderer": {} }
        ] } }] });
        let suggestions = parse_suggestions(&payload);
        assert_eq!(
            suggestions,
            vec![Suggestion {
                suggestion_text: "shape".into(),
                suggestion_query: "shape of you".into(),
            }]
        );
    }

    fn offline_client() -> YtMusicClient {
        YtMusicClient::new(&Upstreams {
            ytmusic: "http://127.0.0.1:9".into(),
            youtube: "http://127.0.0.1:9".into(),
            github: "http://127.0.0.1:9".into(),
        })
    }

    #[test]
    fn search_request_prefers_continuation() {
        assert_eq!(
            search_request(Some("ignored"), Some("tok123")).unwrap(),
            json!({ "continuation": "tok123" })
        );
        assert_eq!(
            search_request(Some("abba"), None).unwrap(),
            json!({ "query": "abba", "params": SONGS_FILTER_PARAMS })
        );
        assert!(search_request(None, None).is_err());
    }

    #[test]
    fn next_request_forwards_played_ids() {
        let played = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            next_request("vid", "RDAMVMvid", &played),
            json!({ "videoId": "vid", "playlistId": "RDAMVMvid", "playedTrackIds": "a,b" })
        );
        assert!(next_request("vid", "RDAMVMvid", &[]).get("playedTrackIds").is_none());
    }

    #[test]
    fn empty_inputs_skip_the_network() {
        let client = offline_client();
        assert_eq!(client.lyrics("").unwrap(), LYRICS_UNAVAILABLE);
        assert!(client.suggestions("").unwrap().results.is_empty());
    }
}
