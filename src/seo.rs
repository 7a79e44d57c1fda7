//! Server-rendered pages for crawlers and link previews.
//!
//! Humans get the SPA; bots get a small static document carrying the title,
//! Open Graph tags and JSON-LD for the requested page.

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};
use serde_json::{Value, json};

use crate::github::GithubUser;
use crate::security::{escape_html, escape_script_json};
use crate::track::TrackRecord;

pub const SEO_TEMPLATE: &str = include_str!("../templates/seo.html");

const TWITTER_HANDLE: &str = "x_flexiyo";
const DEFAULT_KEYWORDS: &str = "Flexiyo, social media, music, clips, friends";

/// Lowercase fragments that mark a crawler, unfurler or preview fetcher.
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawl",
    "slurp",
    "spider",
    "embed",
    "preview",
    "fetch",
    "scan",
    "render",
    "monitor",
    "scrape",
    "linkexpander",
    "google",
    "facebook",
    "twitter",
    "discord",
    "linkedin",
    "whatsapp",
    "telegram",
    "pinterest",
    "gptbot",
    "duckduck",
    "yandex",
    "applebot",
    "bingbot",
    "redditbot",
    "vkshare",
];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid"));

pub struct PageMeta {
    pub path: &'static str,
    pub title: &'static str,
    pub description: &'static str,
}

pub const PAGES_META: &[PageMeta] = &[
    PageMeta {
        path: "/",
        title: "Connect, Share & Explore | Flexiyo",
        description: "Join Flexiyo, the social platform to share short clips, music, and connect with friends. Explore trends, express yourself, and engage freely.",
    },
    PageMeta {
        path: "/music",
        title: "Discover & Enjoy Music | Flexiyo Music",
        description: "Discover trending music, share your favorite tracks, and vibe with friends on Flexiyo Music. Your hub for clips, playlists, and musical expression.",
    },
    PageMeta {
        path: "/clips",
        title: "Watch & Share Clips | Flexiyo Clips",
        description: "Create, share, and explore short video clips on Flexiyo Clips. Connect with friends, follow trending clips, and express yourself instantly.",
    },
    PageMeta {
        path: "/search",
        title: "Find Friends & Content | Flexiyo Search",
        description: "Search for friends, trending clips, and the latest music on Flexiyo Search. Discover content, explore hashtags, and stay updated with what’s popular.",
    },
    PageMeta {
        path: "/auth/login",
        title: "Login & Access Your Account | Flexiyo",
        description: "Log in to Flexiyo to connect with friends, share content, and enjoy trending music and clips. Quick and secure login for all users.",
    },
    PageMeta {
        path: "/auth/signup",
        title: "Sign Up & Join Flexiyo | Flexiyo",
        description: "Sign up for Flexiyo and start sharing clips, music, and connecting with friends. Join the social platform for creative expression and engagement.",
    },
];

const DEFAULT_CONTENT: &str = r#"<h1>Welcome to Flexiyo</h1>
<p>A social community where you can create, share, and explore content - from short videos to music and more.</p>
<section>
  <h2>Explore</h2>
  <ul>
    <li><a href="/music">Listen to Music</a></li>
    <li><a href="/auth/login">Login</a></li>
    <li><a href="/auth/signup">Create account</a></li>
  </ul>
</section>
<article>
  <h2>Flex in Your Onset</h2>
  <p>Flexiyo helps creators and learners connect, share skills, and showcase their talent across social platforms.</p>
</article>"#;

pub fn is_bot(user_agent: &str) -> bool {
    let user_agent = user_agent.to_ascii_lowercase();
    BOT_MARKERS.iter().any(|marker| user_agent.contains(marker))
}

/// Substitutes every `{{ key }}` token. Keys are trimmed; unknown keys render
/// as nothing. Values are inserted verbatim.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            values
                .get(caps[1].trim())
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// Everything a page needs, as plain text. `render` takes care of escaping;
/// only `content_block` is trusted markup and must be built from escaped
/// parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeoPage {
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub author: String,
    pub canonical_url: String,
    pub image: String,
    pub og_type: String,
    pub twitter_handle: String,
    pub structured_data: Value,
    pub content_block: String,
}

impl SeoPage {
    pub fn render(&self) -> String {
        self.render_with(SEO_TEMPLATE)
    }

    pub fn render_with(&self, template: &str) -> String {
        let structured_data = if self.structured_data.is_null() {
            String::new()
        } else {
            escape_script_json(&self.structured_data.to_string())
        };
        let values = HashMap::from([
            ("title", escape_html(&self.title)),
            ("description", escape_html(&self.description)),
            ("keywords", escape_html(&self.keywords)),
            ("author", escape_html(&self.author)),
            ("canonical_url", escape_html(&self.canonical_url)),
            ("image", escape_html(&self.image)),
            ("og_type", escape_html(&self.og_type)),
            ("twitter_handle", escape_html(&self.twitter_handle)),
            ("structured_data", structured_data),
            ("content_block", self.content_block.clone()),
        ]);
        render_template(template, &values)
    }
}

fn join_url(origin: &str, path: &str) -> String {
    format!("{}{path}", origin.trim_end_matches('/'))
}

pub fn music_page(origin: &str, slug: &str, track: &TrackRecord) -> SeoPage {
    let canonical_url = join_url(origin, &format!("/music/{slug}"));
    let image = track
        .images
        .get(2)
        .map(|thumbnail| thumbnail.url.clone())
        .unwrap_or_default();
    let first_artist = track.artists.split('•').next().unwrap_or_default().trim();
    let description = format!(
        "Listen to {} by {first_artist}. Enjoy high-quality audio, view lyrics, and more on Flexiyo Music.",
        track.title
    );
    let plays = track.plays_count.as_deref().unwrap_or_default();

    let mut content_block = format!(
        "<p><strong>Duration:</strong> {}</p><p><strong>Plays:</strong> {}</p>",
        escape_html(&track.duration),
        escape_html(plays)
    );
    if !image.is_empty() {
        content_block.push_str(&format!(
            r#"<figure><img src="{}" alt="{}" loading="lazy" /></figure>"#,
            escape_html(&image),
            escape_html(&track.title)
        ));
    }

    let structured_data = json!({
        "@context": "https://schema.org",
        "@type": "MusicRecording",
        "name": track.title,
        "byArtist": { "@type": "MusicGroup", "name": track.artists },
        "duration": track.duration,
        "image": image,
        "url": canonical_url,
        "description": description,
    });

    SeoPage {
        title: format!("{} - {}", track.title, track.artists),
        description,
        keywords: track.keywords.join(", "),
        author: track.artists.clone(),
        canonical_url,
        image,
        og_type: "music.song".into(),
        twitter_handle: TWITTER_HANDLE.into(),
        structured_data,
        content_block,
    }
}

pub fn user_page(origin: &str, user: &GithubUser) -> SeoPage {
    let canonical_url = join_url(origin, &format!("/u/{}", user.login));
    let name = user.display_name();
    let image = user.avatar_url.clone().unwrap_or_default();
    let twitter = user.twitter_username.clone().unwrap_or_default();

    let same_as: Vec<String> = [
        user.html_url.clone(),
        user.blog.clone().unwrap_or_default(),
        if twitter.is_empty() {
            String::new()
        } else {
            format!("https://twitter.com/{twitter}")
        },
    ]
    .into_iter()
    .filter(|link| !link.is_empty())
    .collect();

    let structured_data = json!({
        "@context": "https://schema.org",
        "@type": "Person",
        "name": name,
        "url": user.html_url,
        "image": image,
        "description": user.bio,
        "mainEntityOfPage": canonical_url,
        "sameAs": same_as,
    });

    let mut content_block = String::new();
    if !image.is_empty() {
        content_block.push_str(&format!(
            r#"<img src="{}" width="120" alt="{}" loading="lazy" />"#,
            escape_html(&image),
            escape_html(&user.login)
        ));
    }
    content_block.push_str(&format!(
        "<p><strong>Followers:</strong> {}</p><p><strong>Following:</strong> {}</p><p><strong>Public Repos:</strong> {}</p>",
        format_thousands(user.followers),
        format_thousands(user.following),
        format_thousands(user.public_repos)
    ));

    SeoPage {
        title: format!("{name} (@{}) - Flexiyo Profile", user.login),
        description: format!(
            "{} Followers | {} Repositories. View the profile of {name} on Flexiyo.",
            user.followers, user.public_repos
        ),
        keywords: format!("{}, github, developer, portfolio", user.login),
        author: user.login.clone(),
        canonical_url,
        image,
        og_type: "profile".into(),
        twitter_handle: twitter,
        structured_data,
        content_block,
    }
}

/// Page for any route without a dedicated renderer.
pub fn default_page(origin: &str, path: &str) -> SeoPage {
    let normalized = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    let known = PAGES_META.iter().find(|meta| meta.path == normalized);
    let meta = known.unwrap_or(&PAGES_META[0]);
    let canonical_url = join_url(origin, known.map_or(path, |meta| meta.path));

    SeoPage {
        title: meta.title.into(),
        description: meta.description.into(),
        keywords: DEFAULT_KEYWORDS.into(),
        author: "Flexiyo".into(),
        structured_data: json!({
            "@context": "https://schema.org",
            "@type": "WebSite",
            "name": "Flexiyo",
            "url": canonical_url,
            "description": meta.description,
        }),
        canonical_url,
        image: String::new(),
        og_type: "website".into(),
        twitter_handle: TWITTER_HANDLE.into(),
        content_block: DEFAULT_CONTENT.into(),
    }
}

/// `1234567` → `1,234,567`.
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(ch);
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Thumbnail;

    const ORIGIN: &str = "https://flexiyo.test";

    fn sample_track() -> TrackRecord {
        TrackRecord {
            video_id: "abc123".into(),
            slug: "song_abc123".into(),
            title: "Song <Live>".into(),
            keywords: vec!["pop".into(), "live".into()],
            artists: "Singer • Band".into(),
            duration: "03:33".into(),
            plays_count: Some("1.2M".into()),
            images: (0..3)
                .map(|index| Thumbnail {
                    url: format!("https://img.test/{index}.jpg"),
                    width: None,
                    height: None,
                })
                .collect(),
        }
    }

    fn sample_user() -> GithubUser {
        serde_json::from_value(json!({
            "login": "octocat",
            "name": "The Octocat",
            "bio": "</script>",
            "avatar_url": "https://avatars.test/octocat",
            "html_url": "https://github.com/octocat",
            "blog": "",
            "twitter_username": "octo",
            "followers": 12345,
            "following": 7,
            "public_repos": 1002
        }))
        .unwrap()
    }

    #[test]
    fn bots_are_detected_case_insensitively() {
        assert!(is_bot("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(is_bot("facebookexternalhit/1.1"));
        assert!(is_bot("WhatsApp/2.23"));
        assert!(is_bot("Slackbot-LinkExpanding 1.0"));
        assert!(!is_bot(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
        ));
        assert!(!is_bot(""));
    }

    #[test]
    fn template_tokens_are_trimmed_and_unknown_keys_emptied() {
        let values = HashMap::from([("title", "Hi".to_string())]);
        assert_eq!(
            render_template("<t>{{ title }}|{{title}}|{{ missing }}</t>", &values),
            "<t>Hi|Hi|</t>"
        );
    }

    #[test]
    fn music_page_fields() {
        let page = music_page(ORIGIN, "song_abc123", &sample_track());
        assert_eq!(page.title, "Song <Live> - Singer • Band");
        assert_eq!(
            page.description,
            "Listen to Song <Live> by Singer. Enjoy high-quality audio, view lyrics, and more on Flexiyo Music."
        );
        assert_eq!(page.keywords, "pop, live");
        assert_eq!(page.canonical_url, "https://flexiyo.test/music/song_abc123");
        assert_eq!(page.image, "https://img.test/2.jpg");
        assert_eq!(page.structured_data["@type"], "MusicRecording");
        assert_eq!(page.structured_data["byArtist"]["name"], "Singer • Band");
        assert!(page.content_block.contains("<p><strong>Plays:</strong> 1.2M</p>"));
        assert!(page.content_block.contains(r#"alt="Song &lt;Live&gt;" loading="lazy""#));
    }

    #[test]
    fn music_page_without_third_image_has_no_figure() {
        let mut track = sample_track();
        track.images.truncate(2);
        let page = music_page(ORIGIN, "song_abc123", &track);
        assert!(page.image.is_empty());
        assert!(!page.content_block.contains("<figure>"));
    }

    #[test]
    fn rendered_page_escapes_values() {
        let html = music_page(ORIGIN, "song_abc123", &sample_track()).render();
        assert!(html.contains("<title>Song &lt;Live&gt; - Singer • Band</title>"));
        assert!(html.contains(r#"<meta property="og:type" content="music.song" />"#));
        assert!(html.contains(r#"<link rel="canonical" href="https://flexiyo.test/music/song_abc123" />"#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn user_page_fields() {
        let page = user_page(ORIGIN, &sample_user());
        assert_eq!(page.title, "The Octocat (@octocat) - Flexiyo Profile");
        assert_eq!(
            page.description,
            "12345 Followers | 1002 Repositories. View the profile of The Octocat on Flexiyo."
        );
        assert_eq!(page.keywords, "octocat, github, developer, portfolio");
        assert_eq!(page.twitter_handle, "octo");
        assert_eq!(
            page.structured_data["sameAs"],
            json!(["https://github.com/octocat", "https://twitter.com/octo"])
        );
        assert_eq!(
            page.structured_data["mainEntityOfPage"],
            "https://flexiyo.test/u/octocat"
        );
        assert!(page.content_block.contains("<strong>Followers:</strong> 12,345"));
        assert!(page.content_block.contains("<strong>Public Repos:</strong> 1,002"));
    }

    #[test]
    fn structured_data_cannot_close_script_element() {
        let html = user_page(ORIGIN, &sample_user()).render();
        let script_start = html.find("application/ld+json").unwrap();
        let script = &html[script_start..];
        let close = script.find("</script>").unwrap();
        assert!(script[..close].contains(r"<\/script>"));
    }

    #[test]
    fn default_page_uses_known_metadata() {
        let page = default_page(ORIGIN, "/music/");
        assert_eq!(page.title, "Discover & Enjoy Music | Flexiyo Music");
        assert_eq!(page.canonical_url, "https://flexiyo.test/music");
        assert!(page.content_block.contains("Flex in Your Onset"));

        let page = default_page(ORIGIN, "/");
        assert_eq!(page.title, "Connect, Share & Explore | Flexiyo");
    }

    #[test]
    fn default_page_for_unknown_path_keeps_request_path() {
        let page = default_page(ORIGIN, "/settings/privacy");
        assert_eq!(page.title, PAGES_META[0].title);
        assert_eq!(page.canonical_url, "https://flexiyo.test/settings/privacy");
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(1_234_567), "1,234,567");
    }
}
