#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_FLEXIYO_PORT: u16 = 8080;
pub const DEFAULT_FLEXIYO_HOST: &str = "127.0.0.1";
pub const DEFAULT_WWW_ROOT: &str = "dist";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SITE_ORIGIN: &str = "https://flexiyo.pages.dev";
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "https://flexiyo.pages.dev",
    "https://flexiyo.web.app",
    "http://localhost:3000",
];
pub const DEFAULT_YTMUSIC_BASE_URL: &str = "https://music.youtube.com";
pub const DEFAULT_YOUTUBE_BASE_URL: &str = "https://www.youtube.com";
pub const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_TRACK_CACHE_TTL_SECS: u64 = 3600;

/// Base URLs of every third-party service the edge talks to. Tests point these
/// at a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstreams {
    pub ytmusic: String,
    pub youtube: String,
    pub github: String,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            ytmusic: DEFAULT_YTMUSIC_BASE_URL.to_string(),
            youtube: DEFAULT_YOUTUBE_BASE_URL.to_string(),
            github: DEFAULT_GITHUB_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub www_root: PathBuf,
    pub data_dir: PathBuf,
    pub flexiyo_port: u16,
    pub flexiyo_host: String,
    pub site_origin: String,
    pub cors_allowed_origins: Vec<String>,
    pub github_token: Option<String>,
    pub upstreams: Upstreams,
    pub track_cache_ttl: Duration,
}

impl RuntimeConfig {
    /// Location of the libsql database holding played tracks.
    pub fn sitemap_db_path(&self) -> PathBuf {
        self.data_dir.join(crate::sitemap::SITEMAP_DB_FILE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub www_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub flexiyo_port: Option<u16>,
    pub flexiyo_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let www_root = overrides
        .www_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("WWW_ROOT"))
        .unwrap_or_else(|| DEFAULT_WWW_ROOT.to_string());
    let data_dir = overrides
        .data_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("DATA_DIR"))
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let flexiyo_port = overrides
        .flexiyo_port
        .or_else(|| lookup("FLEXIYO_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_FLEXIYO_PORT);
    let flexiyo_host = overrides
        .flexiyo_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("FLEXIYO_HOST"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FLEXIYO_HOST.to_string());
    let site_origin = lookup("SITE_ORIGIN")
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SITE_ORIGIN.to_string());
    let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
        .map(|value| parse_origin_list(&value))
        .filter(|origins| !origins.is_empty())
        .unwrap_or_else(|| {
            DEFAULT_CORS_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect()
        });
    let github_token = lookup("GITHUB_API_TOKEN").filter(|value| !value.trim().is_empty());
    let upstreams = Upstreams {
        ytmusic: base_url_or(lookup("YTMUSIC_BASE_URL"), DEFAULT_YTMUSIC_BASE_URL),
        youtube: base_url_or(lookup("YOUTUBE_BASE_URL"), DEFAULT_YOUTUBE_BASE_URL),
        github: base_url_or(lookup("GITHUB_API_BASE_URL"), DEFAULT_GITHUB_API_BASE_URL),
    };
    let track_cache_ttl = lookup("TRACK_CACHE_TTL_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_TRACK_CACHE_TTL_SECS));

    Ok(RuntimeConfig {
        www_root: PathBuf::from(www_root),
        data_dir: PathBuf::from(data_dir),
        flexiyo_port,
        flexiyo_host,
        site_origin,
        cors_allowed_origins,
        github_token,
        upstreams,
        track_cache_ttl,
    })
}

fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn base_url_or(value: Option<String>, default: &str) -> String {
    value
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a dotenv-style file. Missing files are treated as empty so a bare
/// environment is enough to boot.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
