//! Research cache: content-addressed page store with TTL and background
//! summarization.

use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use asky_llm::Summarizer;

use crate::db::init_db;
use crate::error::{ResearchError, Result};
use crate::types::{CacheEntry, CacheStats, Finding, Link, SummaryStatus};
use crate::worker::WorkerPool;

const BACKGROUND_SUMMARY_INPUT_CHARS: usize = 24_000;
const BACKGROUND_SUMMARY_MAX_OUTPUT_CHARS: usize = 800;
const SUMMARY_QUEUE_CAPACITY: usize = 32;

pub const SUMMARIZE_PAGE_PROMPT: &str = "Summarize this web page's main content. \
Capture the key claims, entities, numbers, and conclusions. \
Skip navigation, boilerplate, and advertising.";

/// Optional external vector backend. Chunk/link writes are mirrored to it
/// elsewhere; the cache only needs bulk purge on invalidation.
pub trait VectorMirror: Send + Sync {
    fn purge(&self, cache_ids: &[i64], clear_chunks: bool, clear_links: bool);
}

struct Background {
    pool: WorkerPool,
    summarizer: Arc<Summarizer>,
}

/// Persistent cache of fetched pages and local documents.
///
/// Writes serialize on the store mutex; each upsert commits its cascade
/// (stale chunk/link vector purge) in one transaction. Expired entries are
/// indistinguishable from absent ones.
pub struct ResearchCache {
    db: Mutex<Connection>,
    ttl_hours: i64,
    background: RwLock<Option<Background>>,
    mirror: RwLock<Option<Arc<dyn VectorMirror>>>,
}

impl ResearchCache {
    pub fn open(path: impl AsRef<std::path::Path>, ttl_hours: i64) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            ttl_hours,
            background: RwLock::new(None),
            mirror: RwLock::new(None),
        })
    }

    pub fn open_in_memory(ttl_hours: i64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            ttl_hours,
            background: RwLock::new(None),
            mirror: RwLock::new(None),
        })
    }

    /// Attach the background summarization pool. Without this, `put` never
    /// enqueues summaries (useful for tests and lean setups).
    pub fn start_summarization_workers(&self, summarizer: Arc<Summarizer>, workers: usize) {
        let mut guard = self.background.write().expect("cache lock poisoned");
        *guard = Some(Background {
            pool: WorkerPool::new(workers, SUMMARY_QUEUE_CAPACITY),
            summarizer,
        });
    }

    pub fn set_vector_mirror(&self, mirror: Arc<dyn VectorMirror>) {
        *self.mirror.write().expect("cache lock poisoned") = Some(mirror);
    }

    /// Submission handle to the store-owned background pool, also used
    /// for deferred memory extraction. `None` until workers are started.
    pub fn background_handle(&self) -> Option<crate::worker::PoolHandle> {
        self.background
            .read()
            .expect("cache lock poisoned")
            .as_ref()
            .map(|bg| bg.pool.handle())
    }

    /// Drain and stop the background pool.
    pub async fn shutdown(&self) {
        let background = self.background.write().expect("cache lock poisoned").take();
        if let Some(bg) = background {
            bg.pool.shutdown().await;
        }
    }

    fn url_hash(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        hex::encode(&digest[..8])
    }

    fn content_hash(content: &str) -> String {
        hex::encode(Sha256::digest(content.as_bytes()))
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Cached content for a URL if present and unexpired.
    pub fn lookup(&self, url: &str) -> Result<Option<CacheEntry>> {
        let db = self.db.lock().expect("cache lock poisoned");
        lookup_where(&db, "url_hash = ?1", &Self::url_hash(url))
    }

    /// Corpus-handle access by cache row id.
    pub fn lookup_by_id(&self, cache_id: i64) -> Result<Option<CacheEntry>> {
        let db = self.db.lock().expect("cache lock poisoned");
        lookup_where(&db, "id = ?1", cache_id)
    }

    pub fn cache_id_for(&self, url: &str) -> Result<Option<i64>> {
        Ok(self.lookup(url)?.map(|entry| entry.id))
    }

    /// Upsert by URL. Content-hash change purges chunk vectors and resets
    /// the summary to pending; links-JSON change purges link vectors. A
    /// changed, non-empty body is queued for background summarization when
    /// `trigger_summary` is set. Returns the cache id.
    pub async fn put(
        self: &Arc<Self>,
        url: &str,
        content: &str,
        title: &str,
        links: &[Link],
        trigger_summary: bool,
    ) -> Result<i64> {
        let url_hash = Self::url_hash(url);
        let content_hash = Self::content_hash(content);
        let links_json = serde_json::to_string(links)?;

        let (cache_id, content_changed) = {
            let mut db = self.db.lock().expect("cache lock poisoned");
            let tx = db.transaction()?;

            let existing: Option<(i64, Option<String>, Option<String>)> = match tx.query_row(
                "SELECT id, content_hash, links_json FROM research_cache WHERE url_hash = ?1",
                [&url_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            ) {
                Ok(r) => Some(r),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            let (content_changed, links_changed) = match &existing {
                Some((_, old_hash, old_links)) => (
                    old_hash.as_deref() != Some(content_hash.as_str()),
                    old_links.as_deref() != Some(links_json.as_str()),
                ),
                None => (true, true),
            };

            let now = Self::now();
            let expires = (chrono::Utc::now() + chrono::Duration::hours(self.ttl_hours)).to_rfc3339();
            tx.execute(
                "INSERT INTO research_cache
                 (url, url_hash, content, title, summary_status, links_json,
                  fetch_timestamp, expires_at, content_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?6, ?6)
                 ON CONFLICT(url) DO UPDATE SET
                     content = excluded.content,
                     title = excluded.title,
                     links_json = excluded.links_json,
                     fetch_timestamp = excluded.fetch_timestamp,
                     expires_at = excluded.expires_at,
                     content_hash = excluded.content_hash,
                     updated_at = excluded.updated_at,
                     summary_status = CASE
                         WHEN research_cache.content_hash IS NOT excluded.content_hash
                         THEN 'pending'
                         ELSE research_cache.summary_status
                     END,
                     summary = CASE
                         WHEN research_cache.content_hash IS NOT excluded.content_hash
                         THEN NULL
                         ELSE research_cache.summary
                     END",
                rusqlite::params![url, url_hash, content, title, links_json, now, expires, content_hash],
            )?;

            let cache_id = match &existing {
                Some((id, _, _)) => *id,
                None => tx.last_insert_rowid(),
            };

            if existing.is_some() {
                if content_changed {
                    tx.execute("DELETE FROM content_chunks WHERE cache_id = ?1", [cache_id])?;
                }
                if links_changed {
                    tx.execute("DELETE FROM link_embeddings WHERE cache_id = ?1", [cache_id])?;
                }
                if content_changed || links_changed {
                    self.purge_mirror(&[cache_id], content_changed, links_changed);
                }
            }

            tx.commit()?;
            (cache_id, content_changed)
        };

        if trigger_summary && content_changed && !content.is_empty() {
            self.schedule_summarization(cache_id, url, content).await;
        }

        debug!(url, cache_id, content_changed, "cached URL");
        Ok(cache_id)
    }

    async fn schedule_summarization(self: &Arc<Self>, cache_id: i64, url: &str, content: &str) {
        let (summarizer, pool) = {
            let guard = self.background.read().expect("cache lock poisoned");
            match guard.as_ref() {
                Some(bg) => (Arc::clone(&bg.summarizer), bg.pool.handle()),
                None => return,
            }
        };

        let cache = Arc::clone(self);
        let url = url.to_string();
        let input: String = content.chars().take(BACKGROUND_SUMMARY_INPUT_CHARS).collect();

        let job = async move {
            cache.set_summary_status(cache_id, SummaryStatus::Processing);
            let result = summarizer
                .summarize(
                    &input,
                    SUMMARIZE_PAGE_PROMPT,
                    BACKGROUND_SUMMARY_MAX_OUTPUT_CHARS,
                    None,
                    None,
                )
                .await;
            match result {
                Ok(summary) => {
                    cache.save_summary(cache_id, &summary);
                    debug!(url, "background summarization completed");
                }
                Err(e) => {
                    error!(url, error = %e, "background summarization failed");
                    cache.set_summary_status(cache_id, SummaryStatus::Failed);
                }
            }
        };

        if let Err(e) = pool.submit(job).await {
            warn!(cache_id, error = %e, "could not enqueue summarization");
        }
    }

    /// Background status update; failures here are logged, never raised.
    pub fn set_summary_status(&self, cache_id: i64, status: SummaryStatus) {
        let db = self.db.lock().expect("cache lock poisoned");
        let result = db.execute(
            "UPDATE research_cache SET summary_status = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![status.as_str(), Self::now(), cache_id],
        );
        if let Err(e) = result {
            error!(cache_id, error = %e, "summary status update failed");
        }
    }

    pub fn save_summary(&self, cache_id: i64, summary: &str) {
        let db = self.db.lock().expect("cache lock poisoned");
        let result = db.execute(
            "UPDATE research_cache
             SET summary = ?1, summary_status = 'completed', updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![summary, Self::now(), cache_id],
        );
        if let Err(e) = result {
            error!(cache_id, error = %e, "summary save failed");
        }
    }

    pub fn read_links(&self, url: &str) -> Result<Option<Vec<Link>>> {
        Ok(self.lookup(url)?.map(|entry| entry.links))
    }

    /// Title, summary text, and summary status for a cached URL.
    pub fn read_summary(&self, url: &str) -> Result<Option<(String, Option<String>, SummaryStatus)>> {
        Ok(self
            .lookup(url)?
            .map(|entry| (entry.title, entry.summary, entry.summary_status)))
    }

    pub fn read_content(&self, url: &str) -> Result<Option<String>> {
        Ok(self.lookup(url)?.map(|entry| entry.content))
    }

    /// Remove expired entries with full chunk/link cascade. Returns the
    /// number of cache rows removed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut db = self.db.lock().expect("cache lock poisoned");
        let tx = db.transaction()?;
        let now = Self::now();

        let expired_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM research_cache WHERE expires_at < ?1")?;
            let ids: Vec<i64> = stmt
                .query_map([&now], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            ids
        };

        if !expired_ids.is_empty() {
            self.purge_mirror(&expired_ids, true, true);
            let placeholders = vec!["?"; expired_ids.len()].join(",");
            tx.execute(
                &format!("DELETE FROM content_chunks WHERE cache_id IN ({placeholders})"),
                rusqlite::params_from_iter(expired_ids.iter()),
            )?;
            tx.execute(
                &format!("DELETE FROM link_embeddings WHERE cache_id IN ({placeholders})"),
                rusqlite::params_from_iter(expired_ids.iter()),
            )?;
            tx.execute(
                &format!("DELETE FROM research_cache WHERE id IN ({placeholders})"),
                rusqlite::params_from_iter(expired_ids.iter()),
            )?;
        }
        tx.commit()?;

        let deleted = expired_ids.len();
        if deleted > 0 {
            info!(deleted, "cleaned up expired cache entries");
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let db = self.db.lock().expect("cache lock poisoned");
        let now = Self::now();
        let total: i64 = db.query_row("SELECT COUNT(*) FROM research_cache", [], |r| r.get(0))?;
        let valid: i64 = db.query_row(
            "SELECT COUNT(*) FROM research_cache WHERE expires_at > ?1",
            [&now],
            |r| r.get(0),
        )?;
        let summarized: i64 = db.query_row(
            "SELECT COUNT(*) FROM research_cache WHERE summary_status = 'completed'",
            [],
            |r| r.get(0),
        )?;
        let chunks: i64 = db.query_row("SELECT COUNT(*) FROM content_chunks", [], |r| r.get(0))?;
        Ok(CacheStats {
            total_entries: total as usize,
            valid_entries: valid as usize,
            expired_entries: (total - valid).max(0) as usize,
            summarized_entries: summarized as usize,
            total_chunks: chunks as usize,
        })
    }

    // Findings.

    pub fn save_finding(
        &self,
        finding_text: &str,
        source_url: Option<&str>,
        source_title: Option<&str>,
        tags: &[String],
        session_id: Option<&str>,
    ) -> Result<i64> {
        let tags_json = if tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(tags)?)
        };
        let db = self.db.lock().expect("cache lock poisoned");
        db.execute(
            "INSERT INTO research_findings
             (finding_text, source_url, source_title, tags, created_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![finding_text, source_url, source_title, tags_json, Self::now(), session_id],
        )?;
        let id = db.last_insert_rowid();
        debug!(finding_id = id, "finding saved");
        Ok(id)
    }

    pub fn get_finding(&self, finding_id: i64) -> Result<Option<Finding>> {
        let db = self.db.lock().expect("cache lock poisoned");
        match db.query_row(
            "SELECT id, finding_text, source_url, source_title, tags,
                    embedding IS NOT NULL, embedding_model, created_at, session_id
             FROM research_findings WHERE id = ?1",
            [finding_id],
            row_to_finding,
        ) {
            Ok(f) => Ok(Some(f)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Findings newest first, optionally scoped to one session.
    pub fn list_findings(&self, limit: usize, session_id: Option<&str>) -> Result<Vec<Finding>> {
        let db = self.db.lock().expect("cache lock poisoned");
        let findings = if let Some(sid) = session_id {
            let mut stmt = db.prepare(
                "SELECT id, finding_text, source_url, source_title, tags,
                        embedding IS NOT NULL, embedding_model, created_at, session_id
                 FROM research_findings WHERE session_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows: Vec<Finding> = stmt
                .query_map(rusqlite::params![sid, limit as i64], row_to_finding)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        } else {
            let mut stmt = db.prepare(
                "SELECT id, finding_text, source_url, source_title, tags,
                        embedding IS NOT NULL, embedding_model, created_at, session_id
                 FROM research_findings
                 ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows: Vec<Finding> = stmt
                .query_map([limit as i64], row_to_finding)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };
        Ok(findings)
    }

    pub fn update_finding_embedding(
        &self,
        finding_id: i64,
        embedding: &[u8],
        model: &str,
    ) -> Result<bool> {
        let db = self.db.lock().expect("cache lock poisoned");
        let updated = db.execute(
            "UPDATE research_findings SET embedding = ?1, embedding_model = ?2 WHERE id = ?3",
            rusqlite::params![embedding, model, finding_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_finding(&self, finding_id: i64) -> Result<bool> {
        let db = self.db.lock().expect("cache lock poisoned");
        let deleted = db.execute("DELETE FROM research_findings WHERE id = ?1", [finding_id])?;
        Ok(deleted > 0)
    }

    pub fn delete_findings_by_session(&self, session_id: &str) -> Result<usize> {
        let db = self.db.lock().expect("cache lock poisoned");
        let deleted = db.execute(
            "DELETE FROM research_findings WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(deleted)
    }

    pub fn findings_count(&self) -> Result<usize> {
        let db = self.db.lock().expect("cache lock poisoned");
        let count: i64 = db.query_row("SELECT COUNT(*) FROM research_findings", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Run a closure with the underlying connection. Used by the vector
    /// index so chunk/link/finding blobs live in the same database file.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let db = self.db.lock().expect("cache lock poisoned");
        f(&db).map_err(ResearchError::Database)
    }

    fn purge_mirror(&self, cache_ids: &[i64], clear_chunks: bool, clear_links: bool) {
        let guard = self.mirror.read().expect("cache lock poisoned");
        if let Some(mirror) = guard.as_ref() {
            mirror.purge(cache_ids, clear_chunks, clear_links);
        }
    }
}

fn row_to_finding(row: &rusqlite::Row<'_>) -> rusqlite::Result<Finding> {
    let tags_json: Option<String> = row.get(4)?;
    let tags = tags_json
        .and_then(|t| serde_json::from_str::<Vec<String>>(&t).ok())
        .unwrap_or_default();
    Ok(Finding {
        id: row.get(0)?,
        finding_text: row.get(1)?,
        source_url: row.get(2)?,
        source_title: row.get(3)?,
        tags,
        has_embedding: row.get::<_, i64>(5)? != 0,
        embedding_model: row.get(6)?,
        created_at: row.get(7)?,
        session_id: row.get(8)?,
    })
}

fn lookup_where<P: rusqlite::ToSql>(
    db: &Connection,
    predicate: &str,
    param: P,
) -> Result<Option<CacheEntry>> {
    let now = chrono::Utc::now().to_rfc3339();
    let sql = format!(
        "SELECT id, url, content, title, summary, summary_status, links_json,
                fetch_timestamp, expires_at
         FROM research_cache
         WHERE {predicate} AND expires_at > ?2"
    );
    match db.query_row(&sql, rusqlite::params![param, now], |row| {
        let links_json: Option<String> = row.get(6)?;
        let status: Option<String> = row.get(5)?;
        Ok(CacheEntry {
            id: row.get(0)?,
            url: row.get(1)?,
            content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            summary: row.get(4)?,
            summary_status: SummaryStatus::parse(status.as_deref().unwrap_or("pending")),
            links: links_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
            fetch_timestamp: row.get(7)?,
            expires_at: row.get(8)?,
        })
    }) {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
