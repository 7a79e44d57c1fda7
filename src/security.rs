#![forbid(unsafe_code)]

//! Shared security helpers used by the Flexiyo binaries and the SEO renderer.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// GitHub caps logins at 39 characters.
const MAX_USERNAME_LEN: usize = 39;

/// Fails fast when a binary is started as root. The edge only needs to bind a
/// port and write its sitemap database, so a service account is enough.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Escapes text for HTML element bodies, quoted attributes and XML. The
/// numeric `&#39;` is valid in both languages.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Makes serialized JSON safe to embed in a `<script>` element. JSON strings
/// may legally contain `</script>`, which would end the element early.
pub fn escape_script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

/// Accepts GitHub-style logins only; anything else never reaches the
/// upstream URL.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
