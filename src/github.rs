//! GitHub profile lookups backing the `/u/{username}` pages.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::config::Upstreams;

const USER_AGENT: &str = "Flexiyo-SEO-Bot";
const ACCEPT: &str = "application/vnd.github.v3+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GithubUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub blog: Option<String>,
    #[serde(default)]
    pub twitter_username: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
    #[serde(default)]
    pub public_repos: u64,
}

impl GithubUser {
    /// Display name, falling back to the login when the profile has none.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.login)
    }
}

#[derive(Clone)]
pub struct GithubClient {
    agent: ureq::Agent,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(upstreams: &Upstreams, token: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_base: upstreams.github.clone(),
            token,
        }
    }

    /// `Ok(None)` when GitHub has no such user.
    pub fn fetch_user(&self, login: &str) -> Result<Option<GithubUser>> {
        let url = format!("{}/users/{login}", self.api_base);
        let mut request = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", ACCEPT);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("token {token}"));
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("GitHub API error: {code}"));
            }
            Err(err) => return Err(err).context("calling GitHub users API"),
        };
        let user = response
            .into_json::<GithubUser>()
            .context("decoding GitHub user")?;
        Ok(Some(user))
    }
}
