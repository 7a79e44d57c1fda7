//! Sitemap persistence: every track page that gets served is remembered so
//! crawlers can discover it through `/sitemap.xml`.
//!
//! Rendering the full list on every crawl is wasteful once it grows, so a
//! rendered copy (the snapshot) is kept for a couple of days once enough
//! tracks are known.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use libsql::{Builder, Connection, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::security::escape_html;

pub const SITEMAP_DB_FILE: &str = "sitemap.db";

/// How long a stored snapshot is served before it is rebuilt.
pub const SNAPSHOT_MAX_AGE: TimeDelta = TimeDelta::days(2);
/// Minimum number of entries before a rendered sitemap is worth storing.
pub const SNAPSHOT_THRESHOLD: u64 = 25;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const URLSET_OPEN: &str = r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#;
const URLSET_CLOSE: &str = "</urlset>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapEntry {
    pub video_id: String,
    pub slug: String,
    pub played_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub xml: String,
    pub created_at: String,
}

impl Snapshot {
    /// `None` when the stored timestamp cannot be parsed, which callers treat
    /// as expired.
    pub fn age(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|created| now - created.with_timezone(&Utc))
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now).is_some_and(|age| age < SNAPSHOT_MAX_AGE)
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix. Stored timestamps
/// all use this shape, so they also sort correctly as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sitemap_entries (
            video_id TEXT PRIMARY KEY,
            slug TEXT NOT NULL,
            played_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sitemap_entries_played_at ON sitemap_entries(played_at);

        CREATE TABLE IF NOT EXISTS sitemap_snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            xml TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .await?;
    Ok(())
}

/// Cloneable handle over the sitemap database.
#[derive(Clone)]
pub struct SitemapStore {
    conn: Connection,
}

impl SitemapStore {
    /// Opens (and if necessary creates) the database and its tables.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating sitemap directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening sitemap DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Remembers that a track page was served. Replaying a track only moves
    /// its `lastmod` forward.
    pub async fn record_play(
        &self,
        video_id: &str,
        slug: &str,
        played_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO sitemap_entries (video_id, slug, played_at)
                VALUES (:video_id, :slug, :played_at)
                ON CONFLICT(video_id) DO UPDATE SET
                    slug = excluded.slug,
                    played_at = excluded.played_at
                "#,
                params![video_id, slug, timestamp(played_at)],
            )
            .await
            .with_context(|| format!("recording play of {video_id}"))?;
        Ok(())
    }

    pub async fn list_entries(&self) -> Result<Vec<SitemapEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT video_id, slug, played_at FROM sitemap_entries ORDER BY video_id",
                params![],
            )
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(SitemapEntry {
                video_id: row.get(0)?,
                slug: row.get(1)?,
                played_at: row.get(2)?,
            });
        }
        Ok(entries)
    }

    pub async fn entry_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sitemap_entries", params![])
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        let count: i64 = row.get(0)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Drops entries last played before `cutoff` together with the snapshot
    /// that may still list them. Returns the number of entries removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM sitemap_entries WHERE played_at < ?1",
                params![timestamp(cutoff)],
            )
            .await?;
        self.clear_snapshot().await?;
        Ok(removed)
    }

    pub async fn snapshot(&self) -> Result<Option<Snapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT xml, created_at FROM sitemap_snapshot WHERE id = 1",
                params![],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(Snapshot {
            xml: row.get(0)?,
            created_at: row.get(1)?,
        }))
    }

    async fn store_snapshot(&self, xml: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO sitemap_snapshot (id, xml, created_at)
                VALUES (1, :xml, :created_at)
                ON CONFLICT(id) DO UPDATE SET
                    xml = excluded.xml,
                    created_at = excluded.created_at
                "#,
                params![xml, timestamp(created_at)],
            )
            .await?;
        Ok(())
    }

    pub async fn clear_snapshot(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM sitemap_snapshot", params![])
            .await?;
        Ok(())
    }

    /// Returns the sitemap XML for `origin`, serving a fresh snapshot as is
    /// and rebuilding from the entry table otherwise.
    pub async fn render(&self, origin: &str, now: DateTime<Utc>) -> Result<String> {
        if let Some(snapshot) = self.snapshot().await? {
            if snapshot.is_fresh(now) {
                debug!("serving stored sitemap snapshot");
                return Ok(snapshot.xml);
            }
            info!(created_at = %snapshot.created_at, "discarding expired sitemap snapshot");
            self.clear_snapshot().await?;
        }

        let entries = self.list_entries().await?;
        let xml = build_sitemap_xml(origin, &entries);
        if entries.len() as u64 >= SNAPSHOT_THRESHOLD {
            self.store_snapshot(&xml, now).await?;
            info!(entries = entries.len(), "stored new sitemap snapshot");
        }
        Ok(xml)
    }
}

pub fn build_sitemap_xml(origin: &str, entries: &[SitemapEntry]) -> String {
    let origin = origin.trim_end_matches('/');
    let mut xml = String::with_capacity(128 + entries.len() * 160);
    xml.push_str(XML_HEADER);
    xml.push_str(URLSET_OPEN);
    for entry in entries {
        xml.push_str("<url><loc>");
        xml.push_str(&escape_html(&format!("{origin}/music/{}", entry.slug)));
        xml.push_str("</loc><lastmod>");
        xml.push_str(&escape_html(&entry.played_at));
        xml.push_str("</lastmod><changefreq>weekly</changefreq><priority>0.8</priority></url>");
    }
    xml.push_str(URLSET_CLOSE);
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const ORIGIN: &str = "https://flexiyo.test";

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    async fn create_store() -> Result<(tempfile::TempDir, SitemapStore)> {
        let dir = tempdir()?;
        let store = SitemapStore::open(&dir.path().join("data").join(SITEMAP_DB_FILE)).await?;
        Ok((dir, store))
    }

    async fn fill(store: &SitemapStore, count: usize, played_at: DateTime<Utc>) -> Result<()> {
        for index in 0..count {
            let id = format!("vid{index:03}");
            store
                .record_play(&id, &format!("song_{id}"), played_at)
                .await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn record_play_upserts_by_video_id() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store.record_play("b", "old_b", at(1, 0)).await?;
        store.record_play("a", "song_a", at(1, 1)).await?;
        store.record_play("b", "new_b", at(2, 0)).await?;

        let entries = store.list_entries().await?;
        assert_eq!(store.entry_count().await?, 2);
        assert_eq!(entries[0].video_id, "a");
        assert_eq!(
            entries[1],
            SitemapEntry {
                video_id: "b".into(),
                slug: "new_b".into(),
                played_at: "2025-03-02T00:00:00.000Z".into(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn small_sitemaps_are_not_snapshotted() -> Result<()> {
        let (_dir, store) = create_store().await?;
        fill(&store, 3, at(1, 0)).await?;

        let xml = store.render(ORIGIN, at(1, 12)).await?;
        assert!(xml.starts_with(XML_HEADER));
        assert!(xml.contains("<loc>https://flexiyo.test/music/song_vid000</loc>"));
        assert_eq!(xml.matches("<url>").count(), 3);
        assert!(store.snapshot().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_is_served_until_it_expires() -> Result<()> {
        let (_dir, store) = create_store().await?;
        fill(&store, SNAPSHOT_THRESHOLD as usize, at(1, 0)).await?;

        let first = store.render(ORIGIN, at(1, 12)).await?;
        let snapshot = store.snapshot().await?.context("snapshot stored")?;
        assert_eq!(snapshot.xml, first);
        assert_eq!(snapshot.created_at, "2025-03-01T12:00:00.000Z");

        store.record_play("zzz", "late_zzz", at(2, 0)).await?;
        let cached = store.render(ORIGIN, at(2, 12)).await?;
        assert_eq!(cached, first);
        assert!(!cached.contains("late_zzz"));

        let rebuilt = store.render(ORIGIN, at(3, 13)).await?;
        assert!(rebuilt.contains("late_zzz"));
        let snapshot = store.snapshot().await?.context("snapshot replaced")?;
        assert_eq!(snapshot.created_at, "2025-03-03T13:00:00.000Z");
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_snapshot_counts_as_expired() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store.store_snapshot("<stale/>", at(1, 0)).await?;
        store
            .conn
            .execute(
                "UPDATE sitemap_snapshot SET created_at = 'garbage'",
                params![],
            )
            .await?;

        let xml = store.render(ORIGIN, at(1, 1)).await?;
        assert_ne!(xml, "<stale/>");
        assert!(store.snapshot().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn prune_drops_old_entries_and_snapshot() -> Result<()> {
        let (_dir, store) = create_store().await?;
        store.record_play("old", "old_old", at(1, 0)).await?;
        store.record_play("new", "new_new", at(10, 0)).await?;
        store.store_snapshot("<cached/>", at(10, 0)).await?;

        let removed = store.prune_older_than(at(5, 0)).await?;
        assert_eq!(removed, 1);
        assert_eq!(store.entry_count().await?, 1);
        assert!(store.snapshot().await?.is_none());
        Ok(())
    }

    #[test]
    fn sitemap_xml_escapes_values() {
        let entries = vec![SitemapEntry {
            video_id: "x".into(),
            slug: "rock'n-roll_x&y".into(),
            played_at: "2025-03-01T00:00:00.000Z".into(),
        }];
        let xml = build_sitemap_xml("https://flexiyo.test/", &entries);
        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#,
                "<url><loc>https://flexiyo.test/music/rock&#39;n-roll_x&amp;y</loc>",
                "<lastmod>2025-03-01T00:00:00.000Z</lastmod>",
                "<changefreq>weekly</changefreq><priority>0.8</priority></url>",
                "</urlset>"
            )
        );
    }

    #[test]
    fn snapshot_age_boundaries() {
        let snapshot = Snapshot {
            xml: String::new(),
            created_at: timestamp(at(1, 0)),
        };
        assert!(snapshot.is_fresh(at(2, 23)));
        assert!(!snapshot.is_fresh(at(3, 0)));
    }
}
