use crate::config::job::JobConfig;
use crate::core::{parser, template};
use crate::domain::model::{Batch, ProgressEvent, Row, RowOutcome, RowResult};
use crate::domain::ports::{ChatApi, ProgressSink};
use crate::utils::error::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Drives all batches with at most `workers` in flight. Per row: render
/// content, render prompt, append the format instruction, call the API and
/// parse the reply. A row failure marks that row and the run continues; no
/// request is ever retried. Once the cancel flag is set, unstarted batches
/// are skipped while in-flight ones finish naturally.
///
/// Outcomes come back in input order regardless of batch completion order.
pub async fn dispatch_batches<A, P>(
    api: &A,
    batches: Vec<Batch>,
    config: &JobConfig,
    progress: &P,
    cancel: &AtomicBool,
) -> Vec<RowOutcome>
where
    A: ChatApi,
    P: ProgressSink,
{
    let batches_total = batches.len();
    let instruction =
        template::format_instruction(&config.output.columns, config.response_format());
    let instruction = instruction.as_str();

    let batches_done = Arc::new(AtomicUsize::new(0));
    let rows_succeeded = Arc::new(AtomicUsize::new(0));
    let rows_failed = Arc::new(AtomicUsize::new(0));

    let mut batch_results: Vec<(usize, Vec<RowOutcome>)> = stream::iter(batches)
        .map(|batch| {
            let batches_done = Arc::clone(&batches_done);
            let rows_succeeded = Arc::clone(&rows_succeeded);
            let rows_failed = Arc::clone(&rows_failed);

            async move {
                let batch_index = batch.index;
                let mut outcomes = Vec::with_capacity(batch.rows.len());

                if cancel.load(Ordering::SeqCst) {
                    tracing::debug!("Batch {} skipped after cancellation", batch_index);
                } else {
                    tracing::debug!(
                        "Batch {} started ({} rows)",
                        batch_index,
                        batch.rows.len()
                    );
                    for row in &batch.rows {
                        let outcome = process_row(api, row, config, instruction).await;
                        match &outcome.result {
                            RowResult::Completed(_) => {
                                rows_succeeded.fetch_add(1, Ordering::SeqCst)
                            }
                            RowResult::Failed(_) => rows_failed.fetch_add(1, Ordering::SeqCst),
                        };
                        outcomes.push(outcome);
                    }
                }

                let done = batches_done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(ProgressEvent {
                    batches_done: done,
                    batches_total,
                    rows_succeeded: rows_succeeded.load(Ordering::SeqCst),
                    rows_failed: rows_failed.load(Ordering::SeqCst),
                });

                (batch_index, outcomes)
            }
        })
        .buffer_unordered(config.workers().max(1))
        .collect()
        .await;

    // 批次完成順序不定，依批次索引還原輸入順序
    batch_results.sort_by_key(|(index, _)| *index);
    batch_results
        .into_iter()
        .flat_map(|(_, outcomes)| outcomes)
        .collect()
}

async fn process_row<A: ChatApi>(
    api: &A,
    row: &Row,
    config: &JobConfig,
    instruction: &str,
) -> RowOutcome {
    match run_row(api, row, config, instruction).await {
        Ok(fields) => RowOutcome {
            row_index: row.index,
            result: RowResult::Completed(fields),
        },
        Err(e) => {
            tracing::warn!("Row {} failed: {}", row.index, e);
            RowOutcome {
                row_index: row.index,
                result: RowResult::Failed(e),
            }
        }
    }
}

async fn run_row<A: ChatApi>(
    api: &A,
    row: &Row,
    config: &JobConfig,
    instruction: &str,
) -> Result<HashMap<String, String>> {
    let content = template::render_content(row, &config.templates.content)?;
    let prompt = template::render_prompt(&content, &config.templates.prompt);
    let full_prompt = format!("{}{}", prompt, instruction);

    let raw = api.complete(&full_prompt).await?;
    parser::parse_response(&raw, &config.output.columns, config.response_format())
}
