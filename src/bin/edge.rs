#![forbid(unsafe_code)]

//! Flexiyo edge server.
//!
//! One axum process that fronts the SPA: it proxies the YouTube Music API the
//! player needs, serves server-rendered pages to crawlers, publishes the
//! sitemap and hands every other request to the static bundle in `WWW_ROOT`.
//! Upstream calls are blocking `ureq` requests, so they always go through
//! `spawn_blocking`.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequestParts, Path as AxumPath, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use flexiyo_edge::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use flexiyo_edge::github::GithubClient;
use flexiyo_edge::security::{ensure_not_root, is_valid_username};
use flexiyo_edge::seo::{self, SeoPage};
use flexiyo_edge::sitemap::SitemapStore;
use flexiyo_edge::track::{TrackDetails, TrackRecord, video_id_from_slug};
use flexiyo_edge::ytmusic::{SearchPage, Suggestions, YtMusicClient, parse_played_ids};
use mime_guess::MimeGuess;
use parking_lot::RwLock;
use rand_core::OsRng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const PAGE_CACHE_CONTROL: &str = "public, max-age=3600, s-maxage=86400";
const SITEMAP_CACHE_CONTROL: &str = "public, max-age=3600";
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type";

#[derive(Debug, Clone)]
struct EdgeArgs {
    config: RuntimeConfig,
    listen_host: IpAddr,
}

impl EdgeArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value)),
                _ => (arg.clone(), None),
            };
            let mut value = || -> Result<String> {
                match inline {
                    Some(value) => Ok(value.to_string()),
                    None => args
                        .next()
                        .ok_or_else(|| anyhow!("{flag} requires a value")),
                }
            };

            match flag.as_str() {
                "--www-root" => overrides.www_root = Some(PathBuf::from(value()?)),
                "--data-dir" => overrides.data_dir = Some(PathBuf::from(value()?)),
                "--port" => overrides.flexiyo_port = Some(parse_port_arg(&value()?)?),
                "--host" => overrides.flexiyo_host = Some(value()?),
                "--env-file" => overrides.env_path = Some(PathBuf::from(value()?)),
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(overrides)?;
        let listen_host = parse_host_arg(&config.flexiyo_host)?;
        Ok(Self {
            config,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/FLEXIYO_HOST")
}

/// Shared handles for every request.
///
/// * `tracks` keeps recently resolved track metadata so crawler bursts on the
///   same page do not hammer YouTube.
/// * `sitemap` records every track that was looked up.
#[derive(Clone)]
struct AppState {
    ytmusic: YtMusicClient,
    github: GithubClient,
    sitemap: SitemapStore,
    tracks: Arc<TrackCache>,
    config: Arc<RuntimeConfig>,
}

struct CachedTrack {
    track: TrackRecord,
    fetched_at: Instant,
}

struct TrackCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedTrack>>,
}

impl TrackCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, video_id: &str) -> Option<TrackRecord> {
        let entries = self.entries.read();
        let cached = entries.get(video_id)?;
        (cached.fetched_at.elapsed() < self.ttl).then(|| cached.track.clone())
    }

    fn insert(&self, track: TrackRecord) {
        let mut entries = self.entries.write();
        entries.retain(|_, cached| cached.fetched_at.elapsed() < self.ttl);
        entries.insert(
            track.video_id.clone(),
            CachedTrack {
                track,
                fetched_at: Instant::now(),
            },
        );
    }
}

impl AppState {
    async fn new(config: RuntimeConfig) -> Result<Self> {
        let sitemap = SitemapStore::open(&config.sitemap_db_path())
            .await
            .context("initializing sitemap store")?;
        Ok(Self {
            ytmusic: YtMusicClient::new(&config.upstreams),
            github: GithubClient::new(&config.upstreams, config.github_token.clone()),
            sitemap,
            tracks: Arc::new(TrackCache::new(config.track_cache_ttl)),
            config: Arc::new(config),
        })
    }

    /// Cached metadata lookup. Every successful lookup is also recorded in the
    /// sitemap; that bookkeeping never fails the request.
    async fn track_metadata(&self, video_id: &str) -> Result<Option<TrackRecord>> {
        let track = match self.tracks.get(video_id) {
            Some(track) => track,
            None => {
                let client = self.ytmusic.clone();
                let id = video_id.to_string();
                let Some(track) = blocking(move || client.track_metadata(&id)).await? else {
                    return Ok(None);
                };
                self.tracks.insert(track.clone());
                track
            }
        };

        if let Err(err) = self
            .sitemap
            .record_play(&track.video_id, &track.slug, Utc::now())
            .await
        {
            warn!(video_id, error = %err, "failed to record play for sitemap");
        }
        Ok(Some(track))
    }
}

/// Runs a blocking upstream call on the blocking pool.
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("upstream task panicked")?
}

#[derive(Debug, Serialize)]
struct ApiSuccess<T> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiSuccess<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Logs the underlying cause and hides it behind `message`.
    fn internal(message: impl Into<String>, cause: anyhow::Error) -> Self {
        let message = message.into();
        error!(error = ?cause, "{message}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `Query` whose rejections are reported in the API envelope.
struct ApiQuery<T>(T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
    }
}

/// Plain-text failure for the HTML routes.
#[derive(Debug)]
struct PageError {
    status: StatusCode,
    message: &'static str,
}

impl PageError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            self.message,
        )
            .into_response()
    }
}

type PageResult = Result<Response, PageError>;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();

    let EdgeArgs {
        config,
        listen_host,
    } = EdgeArgs::parse()?;

    ensure_not_root("edge")?;

    let addr = SocketAddr::new(listen_host, config.flexiyo_port);
    let state = AppState::new(config).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("edge server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running edge server")?;

    Ok(())
}

fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/ytmusic/search", get(search))
        .route("/ytmusic/track", get(track))
        .route("/ytmusic/next", get(next_track))
        .route("/ytmusic/lyrics", get(lyrics))
        .route("/ytmusic/suggestions", get(suggestions))
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), cors));

    Router::new()
        .nest("/api", api)
        .route("/sitemap.xml", get(sitemap))
        .route("/music/sitemap.xml", get(sitemap))
        .route("/music/{slug}", get(music_page))
        .route("/u/{username}", get(user_page))
        .route("/", get(home_page))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

/// The allowed origin to echo back: the caller's when listed, else the first
/// configured one.
fn allowed_origin<'a>(allowed: &'a [String], origin: Option<&'a str>) -> Option<&'a str> {
    origin
        .filter(|origin| allowed.iter().any(|allowed| allowed == origin))
        .or_else(|| allowed.first().map(String::as_str))
}

async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(allow) = allowed_origin(&state.config.cors_allowed_origins, origin.as_deref())
        && let Ok(value) = HeaderValue::from_str(allow)
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    response
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

/// Query values that are present but blank count as missing.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    term: Option<String>,
    continuation: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<ApiSuccess<SearchPage>>> {
    let term = non_empty(query.term);
    let continuation = non_empty(query.continuation);
    if term.is_none() && continuation.is_none() {
        return Err(ApiError::bad_request("Missing search term"));
    }

    let client = state.ytmusic.clone();
    let page = blocking(move || client.search(term.as_deref(), continuation.as_deref()))
        .await
        .map_err(|err| ApiError::internal("Failed to perform search", err))?;
    Ok(ApiSuccess::new(page))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackQuery {
    video_id: Option<String>,
    ssr: Option<String>,
}

/// `ssr=true` answers with the page metadata only; the player additionally
/// gets the playlist and lyrics ids.
async fn track(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TrackQuery>,
) -> ApiResult<Response> {
    let video_id =
        non_empty(query.video_id).ok_or_else(|| ApiError::bad_request("Missing video ID"))?;
    let ssr = query.ssr.as_deref() == Some("true");

    let track = state
        .track_metadata(&video_id)
        .await
        .and_then(|track| track.ok_or_else(|| anyhow!("no metadata for {video_id}")))
        .map_err(|err| ApiError::internal("Failed to fetch track data", err))?;
    if ssr {
        return Ok(ApiSuccess::new(track).into_response());
    }

    let client = state.ytmusic.clone();
    let related = blocking(move || Ok(client.related(&video_id)))
        .await
        .map_err(|err| ApiError::internal("Failed to fetch track data", err))?
        .unwrap_or_default();
    let details = TrackDetails {
        track,
        playlist_id: related.playlist_id,
        browse_id: related.browse_id,
    };
    Ok(ApiSuccess::new(details).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextQuery {
    video_id: Option<String>,
    playlist_id: Option<String>,
    played_track_ids: Option<String>,
}

async fn next_track(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<NextQuery>,
) -> ApiResult<Response> {
    let (Some(video_id), Some(playlist_id)) =
        (non_empty(query.video_id), non_empty(query.playlist_id))
    else {
        return Err(ApiError::bad_request("Missing videoId or playlistId"));
    };
    let played = parse_played_ids(query.played_track_ids.as_deref());

    let client = state.ytmusic.clone();
    let next = blocking(move || client.next_track(&video_id, &playlist_id, &played, &mut OsRng))
        .await
        .map_err(|err| ApiError::internal("Failed to get next track", err))?;
    Ok(ApiSuccess::new(next).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LyricsQuery {
    browse_id: Option<String>,
}

async fn lyrics(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LyricsQuery>,
) -> ApiResult<Json<ApiSuccess<String>>> {
    let browse_id =
        non_empty(query.browse_id).ok_or_else(|| ApiError::bad_request("Missing browse ID"))?;

    let client = state.ytmusic.clone();
    let lyrics = blocking(move || client.lyrics(&browse_id))
        .await
        .map_err(|err| ApiError::internal("Failed to load lyrics", err))?;
    Ok(ApiSuccess::new(lyrics))
}

#[derive(Debug, Default, Deserialize)]
struct SuggestionsQuery {
    term: Option<String>,
}

async fn suggestions(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SuggestionsQuery>,
) -> ApiResult<Json<ApiSuccess<Suggestions>>> {
    let term = non_empty(query.term).ok_or_else(|| ApiError::bad_request("Missing term"))?;

    let client = state.ytmusic.clone();
    let suggestions = blocking(move || client.suggestions(&term))
        .await
        .map_err(|err| ApiError::internal("Failed to get suggestions", err))?;
    Ok(ApiSuccess::new(suggestions))
}

async fn sitemap(State(state): State<AppState>) -> Response {
    match state.sitemap.render(&state.config.site_origin, Utc::now()).await {
        Ok(xml) => (
            [
                (header::CONTENT_TYPE, "application/xml"),
                (header::CACHE_CONTROL, SITEMAP_CACHE_CONTROL),
            ],
            xml,
        )
            .into_response(),
        Err(err) => {
            error!(error = ?err, "sitemap generation failed");
            PageError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error generating sitemap")
                .into_response()
        }
    }
}

fn is_bot_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(seo::is_bot)
}

fn html_page(page: &SeoPage, cache_control: Option<&'static str>) -> Response {
    let mut response = (
        [(header::CONTENT_TYPE, HTML_CONTENT_TYPE)],
        page.render(),
    )
        .into_response();
    if let Some(cache_control) = cache_control {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    }
    response
}

async fn music_page(
    State(state): State<AppState>,
    AxumPath(slug): AxumPath<String>,
    request: Request,
) -> Response {
    if !is_bot_request(request.headers()) {
        return serve_static(&state, request.uri().path()).await;
    }
    render_music_page(&state, &slug)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn render_music_page(state: &AppState, slug: &str) -> PageResult {
    let video_id = video_id_from_slug(slug).ok_or_else(|| {
        PageError::new(StatusCode::BAD_REQUEST, "Invalid URL: Video ID not found.")
    })?;

    let track = match state.track_metadata(video_id).await {
        Ok(Some(track)) if !track.title.is_empty() => track,
        Ok(_) => return Err(PageError::new(StatusCode::NOT_FOUND, "Track data not found.")),
        Err(err) => {
            error!(video_id, error = ?err, "failed to render music page");
            return Err(PageError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to render page. Please try again later.",
            ));
        }
    };

    let page = seo::music_page(&state.config.site_origin, slug, &track);
    Ok(html_page(&page, Some(PAGE_CACHE_CONTROL)))
}

async fn user_page(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
    request: Request,
) -> Response {
    if !is_bot_request(request.headers()) {
        return serve_static(&state, request.uri().path()).await;
    }
    render_user_page(&state, &username)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn render_user_page(state: &AppState, username: &str) -> PageResult {
    if !is_valid_username(username) {
        return Err(PageError::new(StatusCode::BAD_REQUEST, "Username missing"));
    }

    let client = state.github.clone();
    let login = username.to_string();
    let user = match blocking(move || client.fetch_user(&login)).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(PageError::new(StatusCode::NOT_FOUND, "User not found")),
        Err(err) => {
            error!(username, error = ?err, "failed to render user page");
            return Err(PageError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while generating the page.",
            ));
        }
    };

    let page = seo::user_page(&state.config.site_origin, &user);
    Ok(html_page(&page, Some(PAGE_CACHE_CONTROL)))
}

async fn home_page(State(state): State<AppState>, request: Request) -> Response {
    static_fallback(State(state), request).await
}

/// Bots get a generic page for any path; humans get the SPA bundle.
async fn static_fallback(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("Endpoint not found").into_response();
    }
    if is_bot_request(request.headers()) {
        let page = seo::default_page(&state.config.site_origin, path);
        return html_page(&page, None);
    }
    serve_static(&state, path).await
}

async fn serve_static(state: &AppState, path: &str) -> Response {
    serve_www_path(&state.config.www_root, path)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn serve_www_path(root: &Path, request_path: &str) -> PageResult {
    let target = resolve_www_path(root, request_path)?;
    let index = root.join("index.html");

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(index).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => stream_file(index).await,
        Err(_) => Err(PageError::new(StatusCode::NOT_FOUND, "Not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> Result<PathBuf, PageError> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(PageError::new(StatusCode::NOT_FOUND, "Not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes have no extension; missing assets do.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> PageResult {
    let file = File::open(&path)
        .await
        .map_err(|_| PageError::new(StatusCode::NOT_FOUND, "Not found"))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
