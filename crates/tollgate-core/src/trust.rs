//! Per-caller trust scores.
//!
//! Scores live in [0, 1] and move by small fixed steps after each
//! admission cycle. [`TrustDb`] persists them in redb so several
//! short-lived gateway processes share one view; every update is a
//! load-merge-save inside a single write transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Key: caller identity (UTF-8). Value: JSON-encoded [`TrustRecord`].
const TRUST: TableDefinition<&[u8], &[u8]> = TableDefinition::new("trust");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustUpdate {
    Success,
    Failure,
    Blocked,
}

impl TrustUpdate {
    pub fn delta(self) -> f64 {
        match self {
            TrustUpdate::Success => 0.01,
            TrustUpdate::Failure => -0.02,
            TrustUpdate::Blocked => -0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub score: f64,
    pub calls: u64,
    pub failures: u64,
    pub blocks: u64,
    pub updated_at: DateTime<Utc>,
}

impl TrustRecord {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            calls: 0,
            failures: 0,
            blocks: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, update: TrustUpdate) {
        self.calls += 1;
        match update {
            TrustUpdate::Success => {}
            TrustUpdate::Failure => self.failures += 1,
            TrustUpdate::Blocked => self.blocks += 1,
        }
        self.score = (self.score + update.delta()).clamp(0.0, 1.0);
        self.updated_at = Utc::now();
    }
}

pub trait TrustStore: Send + Sync {
    /// Current score, or the store default for unknown callers.
    fn score(&self, caller: &str) -> Result<f64>;

    /// Apply one update and return the new score.
    fn record(&self, caller: &str, update: TrustUpdate) -> Result<f64>;

    /// All known callers, sorted by identity.
    fn list(&self) -> Result<Vec<(String, TrustRecord)>>;
}

// ---------------------------------------------------------------------------
// MemoryTrustStore
// ---------------------------------------------------------------------------

pub struct MemoryTrustStore {
    default_score: f64,
    records: Mutex<HashMap<String, TrustRecord>>,
}

impl MemoryTrustStore {
    pub fn new(default_score: f64) -> Self {
        Self {
            default_score,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a caller with a fixed score.
    pub fn set(&self, caller: &str, score: f64) {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.insert(caller.to_string(), TrustRecord::new(score));
    }
}

impl TrustStore for MemoryTrustStore {
    fn score(&self, caller: &str) -> Result<f64> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records
            .get(caller)
            .map(|r| r.score)
            .unwrap_or(self.default_score))
    }

    fn record(&self, caller: &str, update: TrustUpdate) -> Result<f64> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let record = records
            .entry(caller.to_string())
            .or_insert_with(|| TrustRecord::new(self.default_score));
        record.apply(update);
        Ok(record.score)
    }

    fn list(&self) -> Result<Vec<(String, TrustRecord)>> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<_> = records.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// TrustDb
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> GateError {
    GateError::TrustDb(e.to_string())
}

pub struct TrustDb {
    db: Database,
    default_score: f64,
}

impl TrustDb {
    /// Open or create the database at `path`, creating the table eagerly.
    pub fn open(path: &Path, default_score: f64) -> Result<Self> {
        crate::io::ensure_parent(path)?;
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(TRUST).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db, default_score })
    }

    fn get(&self, caller: &str) -> Result<Option<TrustRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TRUST).map_err(db_err)?;
        match table.get(caller.as_bytes()).map_err(db_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }
}

impl TrustStore for TrustDb {
    fn score(&self, caller: &str) -> Result<f64> {
        Ok(self
            .get(caller)?
            .map(|r| r.score)
            .unwrap_or(self.default_score))
    }

    fn record(&self, caller: &str, update: TrustUpdate) -> Result<f64> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let score = {
            let mut table = wt.open_table(TRUST).map_err(db_err)?;
            let existing = table
                .get(caller.as_bytes())
                .map_err(db_err)?
                .map(|v| serde_json::from_slice::<TrustRecord>(v.value()))
                .transpose()?;
            let mut record = existing.unwrap_or_else(|| TrustRecord::new(self.default_score));
            record.apply(update);
            let value = serde_json::to_vec(&record)?;
            table
                .insert(caller.as_bytes(), value.as_slice())
                .map_err(db_err)?;
            record.score
        };
        wt.commit().map_err(db_err)?;
        Ok(score)
    }

    fn list(&self) -> Result<Vec<(String, TrustRecord)>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TRUST).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            let caller = String::from_utf8_lossy(k.value()).into_owned();
            out.push((caller, serde_json::from_slice(v.value())?));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
