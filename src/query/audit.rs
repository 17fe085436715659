//! Execution history records.
//!
//! One [`AuditRecord`] is produced per run, successful or not. Persisting it
//! is up to the caller; the CLI appends JSON lines to a history file.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::query::errors::QueryError;
use crate::query::model::QueryModel;
use crate::query::rows::LoadError;

/// Outcome of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuditStatus {
    /// Rows were produced.
    Success,
    /// Validation or evaluation failed.
    Failed {
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

/// History entry for one execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Model name.
    pub name: String,
    /// Model description.
    pub description: String,
    /// Generated text, or the lenient preview when validation failed.
    pub text: String,
    /// Table ids in selection order.
    pub tables: Vec<String>,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
    /// Outcome.
    #[serde(flatten)]
    pub status: AuditStatus,
    /// Rows returned; zero on failure.
    pub record_count: usize,
    /// Fingerprint of the generated text, absent when validation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<u64>,
}

impl AuditRecord {
    /// Records a successful run.
    pub fn success(model: &QueryModel, text: String, fingerprint: u64, record_count: usize) -> Self {
        Self::base(model, text, AuditStatus::Success, record_count, Some(fingerprint))
    }

    /// Records a failed run.
    pub fn failure(model: &QueryModel, text: String, fingerprint: Option<u64>, err: &QueryError) -> Self {
        let status = AuditStatus::Failed {
            code: err.code().to_owned(),
            message: err.to_string(),
        };
        Self::base(model, text, status, 0, fingerprint)
    }

    /// Records a run that never started because its rows could not be loaded.
    pub fn load_failure(model: &QueryModel, text: String, err: &LoadError) -> Self {
        let status = AuditStatus::Failed {
            code: err.code().to_owned(),
            message: err.to_string(),
        };
        Self::base(model, text, status, 0, None)
    }

    /// Serialises the record as one line of JSON.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Returns `true` for successful runs.
    pub fn succeeded(&self) -> bool {
        self.status == AuditStatus::Success
    }

    fn base(
        model: &QueryModel,
        text: String,
        status: AuditStatus,
        record_count: usize,
        fingerprint: Option<u64>,
    ) -> Self {
        Self {
            name: model.name.clone(),
            description: model.description.clone(),
            text,
            tables: model.tables.iter().map(|t| t.table_id.clone()).collect(),
            created_at: now_rfc3339(),
            status,
            record_count,
            fingerprint,
        }
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
