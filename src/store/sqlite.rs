//! SQLite-backed `ResultStore`.
//!
//! One connection behind a mutex, WAL journal. Inserts go through
//! [`Table::insert`], which refuses to run when the bound values do not
//! match the declared columns one for one.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ResultStore, StoreError, StoreEvent};
use crate::error::ErrorKind;
use crate::models::{
    DiscoveredModel, ModelRecord, ModelRef, ModelScore, ProviderRecord, ScoreComponents, ScoredModel,
    StoredResult, VerificationResult,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS providers (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        base_url TEXT NOT NULL,
        family TEXT NOT NULL,
        auth_secret_ref TEXT NOT NULL,
        is_active BOOLEAN NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS models (
        provider_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        discovered_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        max_context_tokens INTEGER,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        PRIMARY KEY (provider_id, model_id),
        FOREIGN KEY (provider_id) REFERENCES providers(id)
    );

    CREATE TABLE IF NOT EXISTS verification_results (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        model_exists BOOLEAN NOT NULL,
        is_responsive BOOLEAN NOT NULL,
        responsiveness_attempted BOOLEAN NOT NULL,
        latency_ms INTEGER,
        ttft_ms INTEGER,
        http_status INTEGER,
        error_kind TEXT,
        error_message TEXT,
        FOREIGN KEY (provider_id, model_id) REFERENCES models(provider_id, model_id)
    );

    CREATE TABLE IF NOT EXISTS model_scores (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        overall_score REAL NOT NULL,
        speed REAL NOT NULL,
        efficiency REAL NOT NULL,
        cost REAL NOT NULL,
        capability REAL NOT NULL,
        recency REAL NOT NULL,
        score_suffix TEXT NOT NULL,
        computed_at TEXT NOT NULL,
        inputs_hash TEXT NOT NULL,
        FOREIGN KEY (provider_id, model_id) REFERENCES models(provider_id, model_id)
    );

    CREATE INDEX IF NOT EXISTS idx_results_model ON verification_results(provider_id, model_id, seq);
    CREATE INDEX IF NOT EXISTS idx_scores_model ON model_scores(provider_id, model_id, seq);
    CREATE INDEX IF NOT EXISTS idx_results_run ON verification_results(run_id);
";

// ── Checked Inserts ─────────────────────────────────────────────────

struct Table {
    name: &'static str,
    columns: &'static [&'static str],
    on_conflict: &'static str,
}

impl Table {
    fn sql(&self) -> String {
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.name,
            self.columns.join(", "),
            placeholders.join(", ")
        );
        if !self.on_conflict.is_empty() {
            sql.push(' ');
            sql.push_str(self.on_conflict);
        }
        sql
    }

    /// Insert one row and return its rowid.
    fn insert(&self, conn: &Connection, values: &[&dyn ToSql]) -> Result<i64, StoreError> {
        if values.len() != self.columns.len() {
            return Err(StoreError::ColumnMismatch {
                table: self.name,
                columns: self.columns.len(),
                values: values.len(),
            });
        }
        let mut stmt = conn.prepare_cached(&self.sql())?;
        stmt.execute(values)?;
        Ok(conn.last_insert_rowid())
    }
}

const PROVIDERS: Table = Table {
    name: "providers",
    columns: &["id", "display_name", "base_url", "family", "auth_secret_ref", "is_active", "updated_at"],
    on_conflict: "ON CONFLICT(id) DO UPDATE SET
        display_name = excluded.display_name,
        base_url = excluded.base_url,
        family = excluded.family,
        auth_secret_ref = excluded.auth_secret_ref,
        is_active = excluded.is_active,
        updated_at = excluded.updated_at",
};

const MODELS: Table = Table {
    name: "models",
    columns: &[
        "provider_id",
        "model_id",
        "display_name",
        "discovered_at",
        "last_seen_at",
        "max_context_tokens",
        "is_active",
    ],
    on_conflict: "ON CONFLICT(provider_id, model_id) DO UPDATE SET
        display_name = excluded.display_name,
        last_seen_at = excluded.last_seen_at,
        max_context_tokens = COALESCE(excluded.max_context_tokens, models.max_context_tokens),
        is_active = excluded.is_active",
};

const RESULTS: Table = Table {
    name: "verification_results",
    columns: &[
        "provider_id",
        "model_id",
        "run_id",
        "timestamp",
        "model_exists",
        "is_responsive",
        "responsiveness_attempted",
        "latency_ms",
        "ttft_ms",
        "http_status",
        "error_kind",
        "error_message",
    ],
    on_conflict: "",
};

const SCORES: Table = Table {
    name: "model_scores",
    columns: &[
        "provider_id",
        "model_id",
        "overall_score",
        "speed",
        "efficiency",
        "cost",
        "capability",
        "recency",
        "score_suffix",
        "computed_at",
        "inputs_hash",
    ],
    on_conflict: "",
};

const RESULT_SELECT: &str = "SELECT seq, provider_id, model_id, run_id, timestamp, model_exists, is_responsive,
        responsiveness_attempted, latency_ms, ttft_ms, http_status, error_kind, error_message
    FROM verification_results";

const SCORE_SELECT: &str = "SELECT seq, provider_id, model_id, overall_score, speed, efficiency, cost,
        capability, recency, score_suffix, computed_at, inputs_hash
    FROM model_scores";

const MODEL_SELECT: &str = "SELECT provider_id, model_id, display_name, discovered_at, last_seen_at,
        max_context_tokens, is_active
    FROM models";

/// Latest score per model joined with its model row.
const RANKED_SELECT: &str = "SELECT m.provider_id, m.model_id, m.display_name, m.discovered_at, m.last_seen_at,
        m.max_context_tokens, m.is_active,
        s.seq, s.provider_id, s.model_id, s.overall_score, s.speed, s.efficiency, s.cost,
        s.capability, s.recency, s.score_suffix, s.computed_at, s.inputs_hash
    FROM model_scores s
    JOIN (SELECT MAX(seq) AS seq FROM model_scores GROUP BY provider_id, model_id) latest
        ON latest.seq = s.seq
    JOIN models m ON m.provider_id = s.provider_id AND m.model_id = s.model_id";

const MODEL_COLUMNS: usize = 7;

// ── Row Mapping ─────────────────────────────────────────────────────

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{raw}': {e}")))
}

fn result_from_row(row: &Row) -> rusqlite::Result<StoredResult> {
    let error_kind = match row.get::<_, Option<String>>(11)? {
        Some(s) => Some(
            ErrorKind::parse(&s).ok_or_else(|| conversion_error(11, format!("unknown error kind '{s}'")))?,
        ),
        None => None,
    };
    Ok(StoredResult {
        seq: row.get(0)?,
        result: VerificationResult {
            model: ModelRef::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            run_id: row.get(3)?,
            timestamp: parse_ts(row, 4)?,
            model_exists: row.get(5)?,
            is_responsive: row.get(6)?,
            responsiveness_attempted: row.get(7)?,
            latency_ms: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
            ttft_ms: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
            http_status: row.get::<_, Option<i64>>(10)?.map(|v| v as u16),
            error_kind,
            error_message: row.get(12)?,
        },
    })
}

/// Reads the score columns starting at `base` (the `seq` column).
fn score_from_row(row: &Row, base: usize) -> rusqlite::Result<ModelScore> {
    Ok(ModelScore {
        model: ModelRef::new(row.get::<_, String>(base + 1)?, row.get::<_, String>(base + 2)?),
        overall_score: row.get(base + 3)?,
        components: ScoreComponents {
            speed: row.get(base + 4)?,
            efficiency: row.get(base + 5)?,
            cost: row.get(base + 6)?,
            capability: row.get(base + 7)?,
            recency: row.get(base + 8)?,
        },
        score_suffix: row.get(base + 9)?,
        computed_at: parse_ts(row, base + 10)?,
        inputs_hash: row.get(base + 11)?,
    })
}

fn model_from_row(row: &Row) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        provider_id: row.get(0)?,
        model_id: row.get(1)?,
        display_name: row.get(2)?,
        discovered_at: parse_ts(row, 3)?,
        last_seen_at: parse_ts(row, 4)?,
        max_context_tokens: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        is_active: row.get(6)?,
    })
}

fn ranked_from_row(row: &Row) -> rusqlite::Result<ScoredModel> {
    Ok(ScoredModel {
        model: model_from_row(row)?,
        score: score_from_row(row, MODEL_COLUMNS)?,
    })
}

// ── Store ───────────────────────────────────────────────────────────

pub struct SqliteStore {
    db: Mutex<Connection>,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        // WAL mode for concurrent readers
        db.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(db)?;
        info!(path = %path.display(), "Result store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.pragma_update(None, "foreign_keys", "ON")?;
        db.execute_batch(SCHEMA)?;
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            db: Mutex::new(db),
            events,
        })
    }

    /// A panicked writer cannot leave a half-applied row behind (every
    /// statement is atomic), so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| {
            warn!("Result store lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn ranked(&self, filter: &str, params: &[&dyn ToSql]) -> Result<Vec<ScoredModel>, StoreError> {
        let db = self.lock();
        let sql = format!("{RANKED_SELECT} {filter}");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params, ranked_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl ResultStore for SqliteStore {
    fn upsert_provider(&self, provider: &ProviderRecord) -> Result<(), StoreError> {
        let db = self.lock();
        PROVIDERS.insert(
            &db,
            params![
                provider.id,
                provider.display_name,
                provider.base_url,
                provider.family,
                provider.auth_secret_ref,
                provider.is_active,
                ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn upsert_model(&self, model: &ModelRecord) -> Result<(), StoreError> {
        let db = self.lock();
        MODELS.insert(
            &db,
            params![
                model.provider_id,
                model.model_id,
                model.display_name,
                ts(&model.discovered_at),
                ts(&model.last_seen_at),
                model.max_context_tokens.map(|v| v as i64),
                model.is_active,
            ],
        )?;
        Ok(())
    }

    fn upsert_models(
        &self,
        provider_id: &str,
        models: &[DiscoveredModel],
        seen_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let seen = ts(&seen_at);
        let mut db = self.lock();
        let tx = db.transaction()?;
        for m in models {
            let display_name = m.display_name.as_deref().unwrap_or(&m.id);
            MODELS.insert(
                &tx,
                params![
                    provider_id,
                    m.id,
                    display_name,
                    seen,
                    seen,
                    m.max_context_tokens.map(|v| v as i64),
                    true,
                ],
            )?;
        }
        tx.commit()?;
        debug!(provider = provider_id, count = models.len(), "Models upserted");
        Ok(models.len())
    }

    fn deactivate_missing(&self, provider_id: &str, present: &[String]) -> Result<Vec<String>, StoreError> {
        let present: HashSet<&str> = present.iter().map(String::as_str).collect();
        let mut db = self.lock();
        let tx = db.transaction()?;
        let active: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT model_id FROM models WHERE provider_id = ?1 AND is_active = 1 ORDER BY model_id",
            )?;
            let ids = stmt
                .query_map(params![provider_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };
        let gone: Vec<String> = active
            .into_iter()
            .filter(|id| !present.contains(id.as_str()))
            .collect();
        for id in &gone {
            tx.execute(
                "UPDATE models SET is_active = 0 WHERE provider_id = ?1 AND model_id = ?2",
                params![provider_id, id],
            )?;
        }
        tx.commit()?;
        Ok(gone)
    }

    fn list_providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT id, display_name, base_url, family, auth_secret_ref, is_active FROM providers ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProviderRecord {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    base_url: row.get(2)?,
                    family: row.get(3)?,
                    auth_secret_ref: row.get(4)?,
                    is_active: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_models(&self, provider_id: Option<&str>) -> Result<Vec<ModelRecord>, StoreError> {
        let db = self.lock();
        let rows = match provider_id {
            Some(id) => {
                let mut stmt = db.prepare(&format!("{MODEL_SELECT} WHERE provider_id = ?1 ORDER BY model_id"))?;
                let rows = stmt
                    .query_map(params![id], model_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = db.prepare(&format!("{MODEL_SELECT} ORDER BY provider_id, model_id"))?;
                let rows = stmt
                    .query_map([], model_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    fn append_verification_result(&self, result: &VerificationResult) -> Result<i64, StoreError> {
        let r = result.clone().normalized();
        let seq = {
            let db = self.lock();
            RESULTS.insert(
                &db,
                params![
                    r.model.provider_id,
                    r.model.model_id,
                    r.run_id,
                    ts(&r.timestamp),
                    r.model_exists,
                    r.is_responsive,
                    r.responsiveness_attempted,
                    r.latency_ms.map(|v| v as i64),
                    r.ttft_ms.map(|v| v as i64),
                    r.http_status.map(i64::from),
                    r.error_kind.map(|k| k.as_str()),
                    r.error_message,
                ],
            )?
        };
        self.publish(StoreEvent::ResultAppended { model: r.model, seq });
        Ok(seq)
    }

    fn append_model_score(&self, score: &ModelScore) -> Result<i64, StoreError> {
        let seq = {
            let db = self.lock();
            let c = &score.components;
            SCORES.insert(
                &db,
                params![
                    score.model.provider_id,
                    score.model.model_id,
                    score.overall_score,
                    c.speed,
                    c.efficiency,
                    c.cost,
                    c.capability,
                    c.recency,
                    score.score_suffix,
                    ts(&score.computed_at),
                    score.inputs_hash,
                ],
            )?
        };
        self.publish(StoreEvent::ScoreAppended {
            model: score.model.clone(),
            seq,
            overall: score.overall_score,
        });
        Ok(seq)
    }

    fn latest_result(&self, model: &ModelRef) -> Result<Option<StoredResult>, StoreError> {
        let db = self.lock();
        let row = db
            .query_row(
                &format!("{RESULT_SELECT} WHERE provider_id = ?1 AND model_id = ?2 ORDER BY seq DESC LIMIT 1"),
                params![model.provider_id, model.model_id],
                result_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn latest_score(&self, model: &ModelRef) -> Result<Option<ModelScore>, StoreError> {
        let db = self.lock();
        let row = db
            .query_row(
                &format!("{SCORE_SELECT} WHERE provider_id = ?1 AND model_id = ?2 ORDER BY seq DESC LIMIT 1"),
                params![model.provider_id, model.model_id],
                |row| score_from_row(row, 0),
            )
            .optional()?;
        Ok(row)
    }

    fn result_history(&self, model: &ModelRef, limit: usize) -> Result<Vec<StoredResult>, StoreError> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "{RESULT_SELECT} WHERE provider_id = ?1 AND model_id = ?2 ORDER BY seq DESC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![model.provider_id, model.model_id, limit as i64], result_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_models_by_score_range(&self, min: f64, max: f64) -> Result<Vec<ScoredModel>, StoreError> {
        self.ranked(
            "WHERE s.overall_score >= ?1 AND s.overall_score <= ?2
             ORDER BY s.overall_score DESC, s.provider_id, s.model_id",
            params![min, max],
        )
    }

    fn top_models(&self, limit: usize) -> Result<Vec<ScoredModel>, StoreError> {
        self.ranked(
            "ORDER BY s.overall_score DESC, s.provider_id, s.model_id LIMIT ?1",
            params![limit as i64],
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
