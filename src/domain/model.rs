use crate::utils::error::EtlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cell value written when a completed response is missing a declared field.
pub const GAP_MARKER: &str = "#N/A";

/// Prefix of the cell value written into every output column of a failed row.
pub const FAILURE_MARKER_PREFIX: &str = "#FAILED:";

/// One input row: cell values keyed by column name plus the 0-based position
/// the row had in the input sheet. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub index: usize,
    pub cells: HashMap<String, String>,
}

impl Row {
    pub fn cell(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(|v| v.as_str())
    }
}

/// A loaded tabular artifact. The name is the input file stem; column order
/// is the header order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// A consecutive slice of eligible rows, the unit a worker slot claims.
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug)]
pub enum RowResult {
    /// Parsed output fields, keyed by declared column name. Missing fields
    /// become gap markers at aggregation time.
    Completed(HashMap<String, String>),
    Failed(EtlError),
}

#[derive(Debug)]
pub struct RowOutcome {
    pub row_index: usize,
    pub result: RowResult,
}

impl RowOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.result, RowResult::Failed(_))
    }
}

/// Emitted once per finished batch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressEvent {
    pub batches_done: usize,
    pub batches_total: usize,
    pub rows_succeeded: usize,
    pub rows_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Terminal report of a run. `output_path` is None when the run was
/// cancelled, because cancelled runs never write the artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub total_rows: usize,
    pub eligible_rows: usize,
    pub skipped_rows: usize,
    pub rows_succeeded: usize,
    pub rows_failed: usize,
    pub batches_total: usize,
    /// Batches fully processed; lower than `batches_total` after cancellation.
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub output_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Reply shape requested from the model and the primary parse strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    #[default]
    Json,
    KeyValue,
}

/// What happens to rows excluded by the skip-check column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SkipPolicy {
    /// Skipped rows are omitted from the output artifact.
    #[default]
    Drop,
    /// Skipped rows are carried through with empty output columns.
    Passthrough,
}
