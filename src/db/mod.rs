use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// SQLite timestamp format used throughout the schema (UTC).
pub const SQLITE_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format(SQLITE_TS_FORMAT).to_string()
}

pub fn parse_sqlite_utc(ts: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(ts, SQLITE_TS_FORMAT).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

#[derive(Debug, Clone)]
pub struct ConfigRow {
    pub id: i64,
    pub community_id: String,
    pub guild_id: String,
    pub status: String,
    pub config_json: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct FaqRow {
    pub id: i64,
    pub community_id: String,
    pub question: String,
    pub answer: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub event_id: String,
    pub community_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub attempts: u32,
    pub next_attempt_at: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnnouncementRow {
    pub id: i64,
    pub community_id: String,
    pub event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub channel_id: Option<String>,
    pub event_time: String,
    pub due_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventCounts {
    pub pending: i64,
    pub delivered: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(database_url: &str) -> Result<Self> {
        let conn = Connection::open(database_url)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS community_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id TEXT NOT NULL UNIQUE,
                guild_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                config_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_configs_guild ON community_configs (guild_id);

            CREATE TABLE IF NOT EXISTS faq_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                embedding TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_faq_community ON faq_entries (community_id);

            CREATE TABLE IF NOT EXISTS message_contexts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sentiment REAL,
                urgency REAL,
                category TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_contexts_channel_date
                ON message_contexts (channel_id, created_at);

            CREATE TABLE IF NOT EXISTS bot_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                community_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at DATETIME NOT NULL,
                last_error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                delivered_at DATETIME
            );
            CREATE INDEX IF NOT EXISTS idx_events_due ON bot_events (status, next_attempt_at);

            CREATE TABLE IF NOT EXISTS scheduled_announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                channel_id TEXT,
                event_time DATETIME NOT NULL,
                due_at DATETIME NOT NULL,
                sent BOOLEAN NOT NULL DEFAULT FALSE,
                sent_at DATETIME
            );
            CREATE INDEX IF NOT EXISTS idx_announcements_due
                ON scheduled_announcements (sent, due_at);
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    // --- Community configurations ---

    /// Insert or replace the configuration for a community. Upserting a
    /// disabled community reactivates it, matching the API contract.
    pub fn upsert_config(
        &self,
        community_id: &str,
        guild_id: &str,
        config_json: &str,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO community_configs (community_id, guild_id, config_json, status, updated_at)
             VALUES (?1, ?2, ?3, 'active', CURRENT_TIMESTAMP)
             ON CONFLICT(community_id) DO UPDATE SET
                 guild_id = ?2,
                 config_json = ?3,
                 status = 'active',
                 updated_at = CURRENT_TIMESTAMP",
            (community_id, guild_id, config_json),
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM community_configs WHERE community_id = ?1",
            [community_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn update_config_json(&self, id: i64, config_json: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE community_configs
             SET config_json = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            (config_json, id),
        )?;
        Ok(n)
    }

    pub fn get_config(&self, community_id: &str) -> anyhow::Result<Option<ConfigRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, community_id, guild_id, status, config_json, updated_at
                 FROM community_configs WHERE community_id = ?1",
                [community_id],
                Self::map_config_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_config_by_id(&self, id: i64) -> anyhow::Result<Option<ConfigRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, community_id, guild_id, status, config_json, updated_at
                 FROM community_configs WHERE id = ?1",
                [id],
                Self::map_config_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_config_by_guild(&self, guild_id: &str) -> anyhow::Result<Option<ConfigRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, community_id, guild_id, status, config_json, updated_at
                 FROM community_configs WHERE guild_id = ?1",
                [guild_id],
                Self::map_config_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_configs(&self) -> anyhow::Result<Vec<ConfigRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, community_id, guild_id, status, config_json, updated_at
             FROM community_configs",
        )?;
        let rows = stmt.query_map([], Self::map_config_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Soft delete: flips status to 'disabled', preserving the row for audit.
    pub fn set_config_status(&self, id: i64, status: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE community_configs
             SET status = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            (status, id),
        )?;
        Ok(n)
    }

    pub fn count_active_configs(&self) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM community_configs WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_config_row(row: &rusqlite::Row) -> rusqlite::Result<ConfigRow> {
        Ok(ConfigRow {
            id: row.get(0)?,
            community_id: row.get(1)?,
            guild_id: row.get(2)?,
            status: row.get(3)?,
            config_json: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    // --- FAQ entries ---

    pub fn insert_faq(
        &self,
        community_id: &str,
        question: &str,
        answer: &str,
        embedding: Option<&[f32]>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let embedding_json = embedding.map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO faq_entries (community_id, question, answer, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            (community_id, question, answer, embedding_json),
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically replaces all FAQ entries for a community. An empty set is
    /// a valid explicit state: existing entries are cleared.
    pub fn replace_faqs(
        &self,
        community_id: &str,
        entries: &[(String, String, Option<Vec<f32>>)],
    ) -> anyhow::Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM faq_entries WHERE community_id = ?1",
            [community_id],
        )?;
        for (question, answer, embedding) in entries {
            let embedding_json = embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO faq_entries (community_id, question, answer, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
                (community_id, question, answer, embedding_json),
            )?;
        }
        tx.commit()?;
        debug!(
            "Database: Replaced FAQ entries for community {} ({} entries)",
            community_id,
            entries.len()
        );
        Ok(entries.len())
    }

    pub fn list_faqs(&self, community_id: &str) -> anyhow::Result<Vec<FaqRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, community_id, question, answer, embedding
             FROM faq_entries WHERE community_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([community_id], |row| {
            let embedding_json: Option<String> = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                embedding_json,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, community_id, question, answer, embedding_json) = row?;
            let embedding = embedding_json
                .map(|json| serde_json::from_str(&json))
                .transpose()?;
            results.push(FaqRow {
                id,
                community_id,
                question,
                answer,
                embedding,
            });
        }
        Ok(results)
    }

    pub fn count_faqs_per_community(&self) -> anyhow::Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT community_id, COUNT(*) FROM faq_entries GROUP BY community_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (community_id, count) = row?;
            counts.insert(community_id, count);
        }
        Ok(counts)
    }

    // --- Message contexts ---

    #[allow(clippy::too_many_arguments)]
    pub fn save_message_context(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        message_id: &str,
        content: &str,
        sentiment: Option<f64>,
        urgency: Option<f64>,
        category: Option<&str>,
    ) -> anyhow::Result<()> {
        debug!(
            "Database: Saving message context {} in channel {}",
            message_id, channel_id
        );
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_contexts
                 (guild_id, channel_id, user_id, message_id, content, sentiment, urgency, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                guild_id, channel_id, user_id, message_id, content, sentiment, urgency, category,
            ),
        )?;
        Ok(())
    }

    /// Removes message contexts older than `retention_hours`.
    /// Returns the number of rows deleted.
    pub fn purge_old_contexts(&self, retention_hours: u64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM message_contexts WHERE created_at < datetime('now', ?1)",
            (format!("-{} hours", retention_hours),),
        )?;
        Ok(count)
    }

    // --- Bot events ---

    pub fn insert_event(
        &self,
        event_id: &str,
        community_id: &str,
        event_type: &str,
        payload: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bot_events (event_id, community_id, event_type, payload, next_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                event_id,
                community_id,
                event_type,
                payload,
                format_utc(next_attempt_at),
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pending events whose next-retry time has passed, oldest due first.
    pub fn due_events(&self, now: DateTime<Utc>, limit: usize) -> anyhow::Result<Vec<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_id, community_id, event_type, payload, status, attempts,
                    next_attempt_at, last_error
             FROM bot_events
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY next_attempt_at
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((format_utc(now), limit), Self::map_event_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn get_event(&self, event_id: &str) -> anyhow::Result<Option<EventRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, event_id, community_id, event_type, payload, status, attempts,
                        next_attempt_at, last_error
                 FROM bot_events WHERE event_id = ?1",
                [event_id],
                Self::map_event_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn mark_event_delivered(
        &self,
        id: i64,
        attempts: u32,
        delivered_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_events
             SET status = 'delivered', attempts = ?1, delivered_at = ?2
             WHERE id = ?3",
            (attempts, format_utc(delivered_at), id),
        )?;
        Ok(())
    }

    pub fn mark_event_retry(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_events
             SET attempts = ?1, next_attempt_at = ?2, last_error = ?3
             WHERE id = ?4",
            (attempts, format_utc(next_attempt_at), error, id),
        )?;
        Ok(())
    }

    /// Terminal failure: exhausted retries or cancelled by a disabled
    /// configuration. The row is kept for manual inspection.
    pub fn mark_event_failed(&self, id: i64, attempts: u32, error: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE bot_events
             SET status = 'failed', attempts = ?1, last_error = ?2
             WHERE id = ?3",
            (attempts, error, id),
        )?;
        Ok(())
    }

    pub fn event_counts(&self) -> anyhow::Result<EventCounts> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM bot_events GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = EventCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => counts.pending = count,
                "delivered" => counts.delivered = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    fn map_event_row(row: &rusqlite::Row) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get(0)?,
            event_id: row.get(1)?,
            community_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            status: row.get(5)?,
            attempts: row.get(6)?,
            next_attempt_at: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    // --- Scheduled announcements ---

    #[allow(clippy::too_many_arguments)]
    pub fn insert_announcement(
        &self,
        community_id: &str,
        event_id: &str,
        title: &str,
        description: Option<&str>,
        channel_id: Option<&str>,
        event_time: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scheduled_announcements
                 (community_id, event_id, title, description, channel_id, event_time, due_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                community_id,
                event_id,
                title,
                description,
                channel_id,
                format_utc(event_time),
                format_utc(due_at),
            ),
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn due_announcements(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<AnnouncementRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, community_id, event_id, title, description, channel_id,
                    event_time, due_at
             FROM scheduled_announcements
             WHERE sent = FALSE AND due_at <= ?1
             ORDER BY due_at
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((format_utc(now), limit), |row| {
            Ok(AnnouncementRow {
                id: row.get(0)?,
                community_id: row.get(1)?,
                event_id: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                channel_id: row.get(5)?,
                event_time: row.get(6)?,
                due_at: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn mark_announcement_sent(&self, id: i64, sent_at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_announcements SET sent = TRUE, sent_at = ?1 WHERE id = ?2",
            (format_utc(sent_at), id),
        )?;
        Ok(())
    }

    /// Replaces prior schedule entries for a community (resync semantics,
    /// same shape as the FAQ replace). Already-sent rows are preserved.
    pub fn replace_pending_announcements(
        &self,
        community_id: &str,
        entries: &[(String, String, Option<String>, Option<String>, DateTime<Utc>, DateTime<Utc>)],
    ) -> anyhow::Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM scheduled_announcements WHERE community_id = ?1 AND sent = FALSE",
            [community_id],
        )?;
        for (event_id, title, description, channel_id, event_time, due_at) in entries {
            tx.execute(
                "INSERT INTO scheduled_announcements
                     (community_id, event_id, title, description, channel_id, event_time, due_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    community_id,
                    event_id,
                    title,
                    description,
                    channel_id,
                    format_utc(*event_time),
                    format_utc(*due_at),
                ),
            )?;
        }
        tx.commit()?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_config_upsert_and_status() {
        let db = test_db();

        let id = db.upsert_config("hack-1", "g1", "{}").unwrap();
        let row = db.get_config("hack-1").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.status, "active");
        assert_eq!(row.guild_id, "g1");

        // Upsert keeps the same row id and replaces the payload
        let id2 = db.upsert_config("hack-1", "g2", "{\"x\":1}").unwrap();
        assert_eq!(id, id2);
        let row = db.get_config("hack-1").unwrap().unwrap();
        assert_eq!(row.guild_id, "g2");
        assert_eq!(row.config_json, "{\"x\":1}");

        // Soft disable preserves the row
        db.set_config_status(id, "disabled").unwrap();
        let row = db.get_config("hack-1").unwrap().unwrap();
        assert_eq!(row.status, "disabled");
        assert_eq!(db.count_active_configs().unwrap(), 0);

        // Re-upsert reactivates
        db.upsert_config("hack-1", "g2", "{}").unwrap();
        assert_eq!(db.count_active_configs().unwrap(), 1);
    }

    #[test]
    fn test_config_lookup_by_guild() {
        let db = test_db();
        db.upsert_config("hack-1", "guild-42", "{}").unwrap();

        assert!(db.get_config_by_guild("guild-42").unwrap().is_some());
        assert!(db.get_config_by_guild("guild-43").unwrap().is_none());
    }

    #[test]
    fn test_faq_replace_is_atomic_and_ordered() {
        let db = test_db();

        let entries = vec![
            ("q1".to_string(), "a1".to_string(), Some(vec![1.0, 0.0])),
            ("q2".to_string(), "a2".to_string(), None),
        ];
        assert_eq!(db.replace_faqs("hack-1", &entries).unwrap(), 2);

        let faqs = db.list_faqs("hack-1").unwrap();
        assert_eq!(faqs.len(), 2);
        assert_eq!(faqs[0].question, "q1");
        assert_eq!(faqs[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(faqs[1].embedding, None);
        assert!(faqs[0].id < faqs[1].id);

        // Replace with a single entry drops the old set
        let entries = vec![("q3".to_string(), "a3".to_string(), None)];
        db.replace_faqs("hack-1", &entries).unwrap();
        let faqs = db.list_faqs("hack-1").unwrap();
        assert_eq!(faqs.len(), 1);
        assert_eq!(faqs[0].question, "q3");

        // Empty sync clears the set entirely
        db.replace_faqs("hack-1", &[]).unwrap();
        assert!(db.list_faqs("hack-1").unwrap().is_empty());
    }

    #[test]
    fn test_faq_isolation_between_communities() {
        let db = test_db();
        db.insert_faq("hack-1", "q1", "a1", None).unwrap();
        db.insert_faq("hack-2", "q2", "a2", None).unwrap();

        db.replace_faqs("hack-1", &[]).unwrap();
        assert!(db.list_faqs("hack-1").unwrap().is_empty());
        assert_eq!(db.list_faqs("hack-2").unwrap().len(), 1);

        let counts = db.count_faqs_per_community().unwrap();
        assert_eq!(counts.get("hack-2"), Some(&1));
        assert_eq!(counts.get("hack-1"), None);
    }

    #[test]
    fn test_context_purge() {
        let db = test_db();

        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_contexts (guild_id, channel_id, user_id, message_id, content, created_at)
             VALUES ('g1', 'c1', 'u1', 'old', 'old msg', datetime('now', '-48 hours'))",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO message_contexts (guild_id, channel_id, user_id, message_id, content, created_at)
             VALUES ('g1', 'c1', 'u1', 'new', 'new msg', datetime('now', '-1 hours'))",
            [],
        )
        .unwrap();
        drop(conn);

        let deleted = db.purge_old_contexts(24).unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn test_event_lifecycle() {
        let db = test_db();
        let now = Utc::now();

        let id = db
            .insert_event("ev-1", "hack-1", "issue_escalation", "{}", now)
            .unwrap();

        // Due immediately
        let due = db.due_events(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, "pending");
        assert_eq!(due[0].attempts, 0);

        // Retry pushes the due time forward
        db.mark_event_retry(id, 1, now + Duration::seconds(30), "timeout")
            .unwrap();
        assert!(db.due_events(now, 10).unwrap().is_empty());
        assert_eq!(db.due_events(now + Duration::seconds(31), 10).unwrap().len(), 1);

        // Terminal failure leaves the row visible in counts
        db.mark_event_failed(id, 5, "exhausted").unwrap();
        assert!(db.due_events(now + Duration::hours(2), 10).unwrap().is_empty());
        let counts = db.event_counts().unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 0);

        let row = db.get_event("ev-1").unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.attempts, 5);
        assert_eq!(row.last_error.as_deref(), Some("exhausted"));
    }

    #[test]
    fn test_event_delivered() {
        let db = test_db();
        let now = Utc::now();
        let id = db
            .insert_event("ev-1", "hack-1", "faq_autoreply_triggered", "{}", now)
            .unwrap();
        db.mark_event_delivered(id, 1, now).unwrap();

        let counts = db.event_counts().unwrap();
        assert_eq!(counts.delivered, 1);
        assert!(db.due_events(now, 10).unwrap().is_empty());
    }

    #[test]
    fn test_announcement_lifecycle() {
        let db = test_db();
        let now = Utc::now();
        let event_time = now + Duration::minutes(60);

        let id = db
            .insert_announcement(
                "hack-1",
                "evt-1",
                "Opening Ceremony",
                Some("Main hall"),
                Some("chan-1"),
                event_time,
                now - Duration::minutes(1),
            )
            .unwrap();

        let due = db.due_announcements(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].title, "Opening Ceremony");

        db.mark_announcement_sent(id, now).unwrap();
        assert!(db.due_announcements(now, 10).unwrap().is_empty());
    }

    #[test]
    fn test_announcement_resync_keeps_sent_rows() {
        let db = test_db();
        let now = Utc::now();

        let sent_id = db
            .insert_announcement("hack-1", "evt-1", "Kickoff", None, None, now, now)
            .unwrap();
        db.mark_announcement_sent(sent_id, now).unwrap();
        db.insert_announcement("hack-1", "evt-2", "Lunch", None, None, now, now)
            .unwrap();

        let entries = vec![(
            "evt-3".to_string(),
            "Demo time".to_string(),
            None,
            None,
            now + Duration::hours(1),
            now + Duration::minutes(50),
        )];
        db.replace_pending_announcements("hack-1", &entries).unwrap();

        // evt-2 (unsent) replaced by evt-3; sent evt-1 is untouched
        let due = db
            .due_announcements(now + Duration::hours(2), 10)
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].event_id, "evt-3");
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = Utc::now();
        let parsed = parse_sqlite_utc(&format_utc(ts)).unwrap();
        assert_eq!(parsed.timestamp(), ts.timestamp());
        assert!(parse_sqlite_utc("not a timestamp").is_none());
    }
}
