//! Append-only log of lookup outcomes.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::is_rfc3339;
use crate::db;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Completed,
    Failed,
}

impl HistoryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::new("HISTORY_READ_FAILED", "Unknown history outcome")
                .with_details(format!("outcome={other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntryInput {
    pub medicine_name: String,
    pub outcome: HistoryOutcome,
    pub failure_code: Option<String>,
    pub payload_json: String,
    pub prescription_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub medicine_name: String,
    pub outcome: HistoryOutcome,
    pub failure_code: Option<String>,
    pub payload_json: String,
    pub payload_sha256: String,
    pub prescription_json: Option<String>,
    pub created_at: String,
}

/// Write-only sink for lookup results. Reading back is only offered for inspection.
pub trait HistorySink: Send + Sync {
    fn append(&self, input: HistoryEntryInput) -> Result<HistoryEntry, AppError>;
}

pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut conn = db::open(path)?;
        db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let mut conn = db::open_in_memory()?;
        db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::new("HISTORY_LOCK_FAILED", "History connection lock poisoned"))
    }

    /// Most recent entries first.
    pub fn list_recent(&self, limit: u32) -> Result<Vec<HistoryEntry>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, medicine_name, outcome, failure_code, payload_json, payload_sha256, prescription_json, created_at
                 FROM lookup_history ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| {
                AppError::new("HISTORY_READ_FAILED", "Failed to prepare history query")
                    .with_details(e.to_string())
            })?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| {
                AppError::new("HISTORY_READ_FAILED", "Failed to query history")
                    .with_details(e.to_string())
            })?;

        let mut out = Vec::new();
        for r in rows {
            let (id, medicine_name, outcome, failure_code, payload_json, payload_sha256, prescription_json, created_at) =
                r.map_err(|e| {
                    AppError::new("HISTORY_READ_FAILED", "Failed to read history row")
                        .with_details(e.to_string())
                })?;
            out.push(HistoryEntry {
                id,
                medicine_name,
                outcome: HistoryOutcome::parse(&outcome)?,
                failure_code,
                payload_json,
                payload_sha256,
                prescription_json,
                created_at,
            });
        }
        Ok(out)
    }
}

impl HistorySink for SqliteHistory {
    fn append(&self, input: HistoryEntryInput) -> Result<HistoryEntry, AppError> {
        if input.medicine_name.trim().is_empty() {
            return Err(AppError::new(
                "HISTORY_INVALID",
                "History entries require a medicine name",
            ));
        }
        if !is_rfc3339(&input.created_at) {
            return Err(AppError::new(
                "HISTORY_INVALID",
                "History entries require an RFC3339 created_at",
            )
            .with_details(format!("created_at={}", input.created_at)));
        }
        let payload_sha256 = hex::encode(Sha256::digest(input.payload_json.as_bytes()));

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO lookup_history(medicine_name, outcome, failure_code, payload_json, payload_sha256, prescription_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                input.medicine_name,
                input.outcome.as_str(),
                input.failure_code,
                input.payload_json,
                payload_sha256,
                input.prescription_json,
                input.created_at,
            ],
        )
        .map_err(|e| {
            AppError::new("HISTORY_WRITE_FAILED", "Failed to append history entry")
                .with_details(e.to_string())
        })?;
        let id = conn.last_insert_rowid();

        Ok(HistoryEntry {
            id,
            medicine_name: input.medicine_name,
            outcome: input.outcome,
            failure_code: input.failure_code,
            payload_json: input.payload_json,
            payload_sha256,
            prescription_json: input.prescription_json,
            created_at: input.created_at,
        })
    }
}
