//! L0/L1/L2 hierarchical memory storage with FTS5 search.
//!
//! Grounded on `session_db.py`'s `save_memory`/`get_memory`/`search_memory`/
//! `get_l0_overview`/`delete_memory`/`get_all_categories`.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    System,
    Environment,
    Skill,
    Project,
    Comm,
    Security,
}

impl MemoryCategory {
    fn as_str(self) -> &'static str {
        match self {
            MemoryCategory::System => "system",
            MemoryCategory::Environment => "environment",
            MemoryCategory::Skill => "skill",
            MemoryCategory::Project => "project",
            MemoryCategory::Comm => "comm",
            MemoryCategory::Security => "security",
        }
    }

    /// Unknown category strings normalize to `Project` rather than being
    /// rejected, so a caller passing a free-form tag never fails a write.
    fn parse(s: &str) -> Self {
        match s {
            "system" => MemoryCategory::System,
            "environment" => MemoryCategory::Environment,
            "skill" => MemoryCategory::Skill,
            "comm" => MemoryCategory::Comm,
            "security" => MemoryCategory::Security,
            _ => MemoryCategory::Project,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub category: MemoryCategory,
    pub l0_abstract: String,
    pub l1_overview: Option<String>,
    pub l2_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confidence: f64,
    pub access_count: i64,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MemoryEntry> {
    let category: String = row.get("category")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(MemoryEntry {
        key: row.get("key")?,
        category: MemoryCategory::parse(&category),
        l0_abstract: row.get("l0_abstract")?,
        l1_overview: row.get("l1_overview")?,
        l2_details: row.get("l2_details")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        confidence: row.get("confidence")?,
        access_count: row.get("access_count")?,
    })
}

impl Store {
    /// UPSERTs a memory entry by key. `created_at`/`access_count` on the
    /// stored row are preserved across an update; only the content fields,
    /// `updated_at`, and `confidence` change.
    pub async fn save_memory(
        &self,
        key: &str,
        category: MemoryCategory,
        l0_abstract: &str,
        l1_overview: Option<&str>,
        l2_details: Option<&str>,
        confidence: f64,
    ) -> StoreResult<()> {
        let key = key.to_string();
        let category = category.as_str();
        let l0_abstract = l0_abstract.to_string();
        let l1_overview = l1_overview.map(str::to_string);
        let l2_details = l2_details.map(str::to_string);
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO memory (key, category, l0_abstract, l1_overview, l2_details, created_at, updated_at, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
                 ON CONFLICT(key) DO UPDATE SET
                     category = excluded.category,
                     l0_abstract = excluded.l0_abstract,
                     l1_overview = excluded.l1_overview,
                     l2_details = excluded.l2_details,
                     updated_at = excluded.updated_at,
                     confidence = excluded.confidence",
                params![key, category, l0_abstract, l1_overview, l2_details, now, confidence],
            )?;
            Ok(())
        })
        .await
    }

    /// Reads a memory entry by key, incrementing its access count. The
    /// increment and read happen inside a single blocking closure so the
    /// two statements commit as one atomic step under the store's mutex.
    pub async fn get_memory(&self, key: &str) -> StoreResult<Option<MemoryEntry>> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            conn.execute(
                "UPDATE memory SET access_count = access_count + 1 WHERE key = ?1",
                params![key],
            )?;
            conn.query_row("SELECT * FROM memory WHERE key = ?1", params![key], row_to_entry)
                .optional()
                .map_err(Into::into)
        })
        .await
    }

    /// FTS5 full-text search over `l0_abstract`/`l1_overview`/`l2_details`,
    /// optionally restricted to one category, ranked by confidence then
    /// popularity.
    pub async fn search_memory(
        &self,
        query: &str,
        category: Option<MemoryCategory>,
        limit: i64,
    ) -> StoreResult<Vec<MemoryEntry>> {
        let query = query.to_string();
        self.run_blocking(move |conn| {
            let mut stmt;
            let rows: Vec<MemoryEntry> = if let Some(category) = category {
                stmt = conn.prepare(
                    "SELECT m.* FROM memory m
                     JOIN memory_fts fts ON m.id = fts.rowid
                     WHERE memory_fts MATCH ?1 AND m.category = ?2
                     ORDER BY m.confidence DESC, m.access_count DESC
                     LIMIT ?3",
                )?;
                stmt.query_map(params![query, category.as_str(), limit], row_to_entry)?
                    .collect::<Result<_, _>>()?
            } else {
                stmt = conn.prepare(
                    "SELECT m.* FROM memory m
                     JOIN memory_fts fts ON m.id = fts.rowid
                     WHERE memory_fts MATCH ?1
                     ORDER BY m.confidence DESC, m.access_count DESC
                     LIMIT ?2",
                )?;
                stmt.query_map(params![query, limit], row_to_entry)?
                    .collect::<Result<_, _>>()?
            };
            Ok(rows)
        })
        .await
    }

    /// L0 abstracts grouped by category, ordered by confidence within each
    /// group, for cheap context injection without pulling full entries.
    pub async fn get_l0_overview(&self) -> StoreResult<BTreeMap<String, Vec<String>>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category, l0_abstract FROM memory ORDER BY category, confidence DESC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut overview: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (category, abstract_) in rows {
                overview.entry(category).or_default().push(abstract_);
            }
            Ok(overview)
        })
        .await
    }

    pub async fn delete_memory(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            let affected = conn.execute("DELETE FROM memory WHERE key = ?1", params![key])?;
            Ok(affected > 0)
        })
        .await
    }

    pub async fn get_all_categories(&self) -> StoreResult<Vec<String>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT category FROM memory ORDER BY category")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get_memory_increments_access_count() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_memory("k1", MemoryCategory::Project, "abstract", None, None, 0.9)
            .await
            .unwrap();

        let first = store.get_memory("k1").await.unwrap().unwrap();
        assert_eq!(first.access_count, 1);
        let second = store.get_memory("k1").await.unwrap().unwrap();
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test]
    async fn save_memory_upserts_by_key() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_memory("k1", MemoryCategory::Project, "first", None, None, 0.5)
            .await
            .unwrap();
        store
            .save_memory("k1", MemoryCategory::System, "second", None, None, 0.8)
            .await
            .unwrap();

        let entry = store.get_memory("k1").await.unwrap().unwrap();
        assert_eq!(entry.l0_abstract, "second");
        assert_eq!(entry.category, MemoryCategory::System);
        assert_eq!(entry.confidence, 0.8);
    }

    #[tokio::test]
    async fn search_memory_finds_matching_text() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_memory("db", MemoryCategory::Project, "database connection pool sizing", None, None, 1.0)
            .await
            .unwrap();
        store
            .save_memory("unrelated", MemoryCategory::Project, "weather forecast", None, None, 1.0)
            .await
            .unwrap();

        let results = store.search_memory("database", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "db");
    }

    #[tokio::test]
    async fn l0_overview_groups_by_category() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_memory("a", MemoryCategory::System, "system fact", None, None, 1.0)
            .await
            .unwrap();
        store
            .save_memory("b", MemoryCategory::Project, "project fact", None, None, 1.0)
            .await
            .unwrap();

        let overview = store.get_l0_overview().await.unwrap();
        assert_eq!(overview.get("system").unwrap(), &vec!["system fact".to_string()]);
        assert_eq!(overview.get("project").unwrap(), &vec!["project fact".to_string()]);
    }

    #[test]
    fn unrecognized_category_strings_normalize_to_project() {
        assert_eq!(MemoryCategory::parse("totally-unknown"), MemoryCategory::Project);
        assert_eq!(MemoryCategory::parse("security"), MemoryCategory::Security);
    }

    #[tokio::test]
    async fn delete_memory_reports_whether_a_row_existed() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_memory("k1", MemoryCategory::Project, "abstract", None, None, 1.0)
            .await
            .unwrap();

        assert!(store.delete_memory("k1").await.unwrap());
        assert!(!store.delete_memory("k1").await.unwrap());
    }
}
