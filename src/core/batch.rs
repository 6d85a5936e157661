use crate::domain::model::{Batch, Row};
use crate::utils::error::{EtlError, Result};

/// A row is eligible unless a skip-check column is configured and the row's
/// cell for it is missing or blank. Whitespace-only counts as blank.
pub fn is_eligible(row: &Row, empty_column: Option<&str>) -> bool {
    match empty_column {
        Some(column) => row
            .cell(column)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false),
        None => true,
    }
}

/// Splits rows into eligible rows (original order) and the indexes of the
/// rows the skip-check excluded.
pub fn partition_rows(rows: &[Row], empty_column: Option<&str>) -> (Vec<Row>, Vec<usize>) {
    let mut eligible = Vec::new();
    let mut skipped = Vec::new();

    for row in rows {
        if is_eligible(row, empty_column) {
            eligible.push(row.clone());
        } else {
            skipped.push(row.index);
        }
    }

    (eligible, skipped)
}

/// Consecutive chunks of at most `batch_size` rows, original order, last
/// chunk may be short.
pub fn make_batches(rows: &[Row], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size < 1 {
        return Err(EtlError::InvalidConfigValueError {
            field: "processing.batch_size".to_string(),
            value: batch_size.to_string(),
            reason: "Batch size must be at least 1".to_string(),
        });
    }

    let batches = rows
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            rows: chunk.to_vec(),
        })
        .collect();

    Ok(batches)
}
