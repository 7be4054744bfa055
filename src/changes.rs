//! Feed of structural changes made by the management layer, consumed to keep
//! the router's vocabulary and the agent's schema snapshot current.

use crate::agent::SqlAgent;
use crate::error::AgentResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

const MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    CreateDatabase,
    DeleteDatabase,
    CreateTable,
    DeleteTable,
    MoveTable,
    DeleteColumn,
    CustomQuery,
}

impl ChangeOperation {
    /// Whether the set of databases itself changed.
    pub fn affects_databases(&self) -> bool {
        matches!(
            self,
            ChangeOperation::CreateDatabase | ChangeOperation::DeleteDatabase
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: ChangeOperation,
    pub database: String,
    pub table: Option<String>,
    #[serde(default)]
    pub detail: Value,
}

/// Bounded, thread-safe change log. Timestamps are strictly increasing, so a
/// timestamp is a usable watermark.
#[derive(Debug, Default)]
pub struct ChangeLog {
    records: Mutex<VecDeque<ChangeRecord>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        operation: ChangeOperation,
        database: impl Into<String>,
        table: Option<String>,
        detail: Value,
    ) -> ChangeRecord {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        let timestamp = match records.back() {
            Some(last) if last.timestamp >= now => last.timestamp + Duration::microseconds(1),
            _ => now,
        };

        let record = ChangeRecord {
            timestamp,
            operation,
            database: database.into(),
            table,
            detail,
        };
        info!(
            "Database change: {:?} on {}.{}",
            record.operation,
            record.database,
            record.table.as_deref().unwrap_or("DATABASE")
        );

        records.push_back(record.clone());
        while records.len() > MAX_RECORDS {
            records.pop_front();
        }
        record
    }

    /// Records strictly newer than `watermark`, oldest first.
    pub fn since(&self, watermark: Option<DateTime<Utc>>) -> Vec<ChangeRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter(|record| watermark.is_none_or(|mark| record.timestamp > mark))
            .cloned()
            .collect()
    }

    /// The newest `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChangeRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeOutcome {
    pub processed: usize,
    pub remapped: bool,
    pub refreshed: bool,
}

/// Applies new change records to an agent, remembering how far it got.
#[derive(Debug, Default)]
pub struct ChangeProcessor {
    watermark: Option<DateTime<Utc>>,
}

impl ChangeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Database additions or removals trigger a registry refresh, keyword
    /// remap and schema refresh; any other change only a schema refresh.
    pub async fn process(&mut self, log: &ChangeLog, agent: &mut SqlAgent) -> AgentResult<ChangeOutcome> {
        let changes = log.since(self.watermark);
        let Some(last) = changes.last() else {
            return Ok(ChangeOutcome::default());
        };
        let last_timestamp = last.timestamp;

        debug!("Processing {} database changes", changes.len());
        let remap = changes.iter().any(|change| change.operation.affects_databases());

        if remap {
            agent.refresh_all().await?;
        } else {
            agent.refresh_schema().await;
        }

        self.watermark = Some(last_timestamp);
        Ok(ChangeOutcome {
            processed: changes.len(),
            remapped: remap,
            refreshed: true,
        })
    }
}
