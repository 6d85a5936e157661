use crate::config::job::JobConfig;
use crate::core::{aggregate, batch, dispatcher, template};
use crate::domain::model::{
    ProgressEvent, Row, RowOutcome, RowResult, RunStatus, RunSummary, Sheet,
};
use crate::domain::ports::{ChatApi, ProgressSink};
use crate::sheet;
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::Validate;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Orchestrates one run: load the sheet, pre-flight the templates, filter
/// and batch the rows, dispatch them against the API, aggregate the
/// outcomes and write the output artifact.
pub struct EtlEngine<A: ChatApi> {
    api: A,
    config: JobConfig,
    cancel: Arc<AtomicBool>,
    monitor: SystemMonitor,
}

impl<A: ChatApi> EtlEngine<A> {
    pub fn new(api: A, config: JobConfig) -> Self {
        Self::new_with_monitoring(api, config, false)
    }

    pub fn new_with_monitoring(api: A, config: JobConfig, monitor_enabled: bool) -> Self {
        Self {
            api,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    /// Shared cancellation flag. Setting it stops new batches from starting
    /// while in-flight requests finish naturally.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.run_with_progress(&|_event: ProgressEvent| {}).await
    }

    pub async fn run_with_progress<P: ProgressSink>(&self, progress: &P) -> Result<RunSummary> {
        let started_at = Utc::now();
        self.config.validate()?;
        self.monitor.log_stats("Startup");

        tracing::info!("📁 Loading input sheet from: {}", self.config.source.file);
        let input = sheet::load_sheet(&self.config.source.file)?;
        tracing::info!(
            "📊 Sheet '{}' loaded: {} columns, {} rows",
            input.name,
            input.columns.len(),
            input.rows.len()
        );

        self.preflight(&input)?;
        let empty_column = self.effective_empty_column(&input);

        let (eligible, skipped) = batch::partition_rows(&input.rows, empty_column.as_deref());
        tracing::info!(
            "🧮 {} of {} rows eligible ({} skipped)",
            eligible.len(),
            input.rows.len(),
            skipped.len()
        );

        let batches = batch::make_batches(&eligible, self.config.batch_size())?;
        let batches_total = batches.len();
        tracing::info!(
            "📦 Dispatching {} batches with {} workers",
            batches_total,
            self.config.workers()
        );

        let outcomes =
            dispatcher::dispatch_batches(&self.api, batches, &self.config, progress, &self.cancel)
                .await;
        self.monitor.log_stats("Dispatch");

        let rows_succeeded = outcomes
            .iter()
            .filter(|o| matches!(o.result, RowResult::Completed(_)))
            .count();
        let rows_failed = outcomes.len() - rows_succeeded;
        let batches_completed =
            count_completed_batches(&eligible, &outcomes, self.config.batch_size());
        let batches_failed = count_failed_batches(&eligible, &outcomes, self.config.batch_size());

        if self.cancel.load(Ordering::SeqCst) {
            tracing::warn!("🛑 Run cancelled; output file not written");
            return Ok(RunSummary {
                status: RunStatus::Cancelled,
                total_rows: input.rows.len(),
                eligible_rows: eligible.len(),
                skipped_rows: skipped.len(),
                rows_succeeded,
                rows_failed,
                batches_total,
                batches_completed,
                batches_failed,
                output_path: None,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let output = aggregate::assemble_output(&input, &outcomes, &self.config);
        sheet::store_sheet(&self.config.output.file, &output)?;
        tracing::info!("💾 Output written to: {}", self.config.output.file);
        self.monitor.log_final_stats();

        Ok(RunSummary {
            status: RunStatus::Completed,
            total_rows: input.rows.len(),
            eligible_rows: eligible.len(),
            skipped_rows: skipped.len(),
            rows_succeeded,
            rows_failed,
            batches_total,
            batches_completed,
            batches_failed,
            output_path: Some(self.config.output.file.clone()),
            started_at,
            finished_at: Utc::now(),
        })
    }

    // 模板與欄位的預檢：缺欄位直接失敗，{{content}} 缺席只警告
    fn preflight(&self, input: &Sheet) -> Result<()> {
        for column in template::template_columns(&self.config.templates.content) {
            if !input.columns.contains(&column) {
                return Err(EtlError::TemplateError { column });
            }
        }

        if !self
            .config
            .templates
            .prompt
            .contains(template::CONTENT_PLACEHOLDER)
        {
            tracing::warn!(
                "⚠️ Prompt template has no {} placeholder; rendered row content will not be inserted",
                template::CONTENT_PLACEHOLDER
            );
        }

        Ok(())
    }

    fn effective_empty_column(&self, input: &Sheet) -> Option<String> {
        match &self.config.source.empty_column {
            Some(column) if !input.columns.contains(column) => {
                tracing::warn!(
                    "⚠️ Skip-check column '{}' not found in sheet; row filtering disabled",
                    column
                );
                None
            }
            other => other.clone(),
        }
    }
}

// 取消只會整批跳過，所以出現過任何結果的批次就是跑完的批次
fn count_completed_batches(eligible: &[Row], outcomes: &[RowOutcome], batch_size: usize) -> usize {
    let batch_of_row = batch_index_by_row(eligible, batch_size);

    let completed: HashSet<usize> = outcomes
        .iter()
        .filter_map(|o| batch_of_row.get(&o.row_index))
        .copied()
        .collect();

    completed.len()
}

fn count_failed_batches(eligible: &[Row], outcomes: &[RowOutcome], batch_size: usize) -> usize {
    let batch_of_row = batch_index_by_row(eligible, batch_size);

    let failed: HashSet<usize> = outcomes
        .iter()
        .filter(|o| o.is_failed())
        .filter_map(|o| batch_of_row.get(&o.row_index))
        .copied()
        .collect();

    failed.len()
}

fn batch_index_by_row(eligible: &[Row], batch_size: usize) -> HashMap<usize, usize> {
    let mut batch_of_row = HashMap::new();
    for (position, row) in eligible.iter().enumerate() {
        batch_of_row.insert(row.index, position / batch_size);
    }
    batch_of_row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::Result as EtlResult;
    use std::io::Write;
    use std::sync::OnceLock;
    use tempfile::TempDir;

    struct CannedApi {
        reply: String,
    }

    impl CannedApi {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
            }
        }
    }

    impl ChatApi for CannedApi {
        async fn complete(&self, _prompt: &str) -> EtlResult<String> {
            Ok(self.reply.clone())
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn test_config(dir: &TempDir, input_name: &str) -> JobConfig {
        let mut config = JobConfig::from_toml_str(
            r#"
[job]
name = "engine-test"

[source]
file = "in.csv"
empty_column = "Status"

[source.columns]
"Name" = true

[api]
url = "https://api.example.com/v1/chat/completions"
key = "k"
model = "m"

[templates]
content = "{row['Name']}"
prompt = "Classify: {{content}}"

[processing]
batch_size = 2
workers = 2

[output]
file = "out.csv"
columns = ["Category"]
"#,
        )
        .unwrap();

        config.source.file = dir.path().join(input_name).to_str().unwrap().to_string();
        config.output.file = dir.path().join("out/result.csv").to_str().unwrap().to_string();
        config
    }

    #[tokio::test]
    async fn test_run_writes_output_in_input_order() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "in.csv",
            "Name,Status\nalpha,done\nbeta,done\ngamma,done\n",
        );
        let config = test_config(&dir, "in.csv");
        let output_file = config.output.file.clone();

        let engine = EtlEngine::new(CannedApi::new("{\"Category\": \"X\"}"), config);
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.eligible_rows, 3);
        assert_eq!(summary.rows_succeeded, 3);
        assert_eq!(summary.rows_failed, 0);
        assert_eq!(summary.batches_total, 2);
        assert_eq!(summary.batches_completed, 2);
        assert_eq!(summary.output_path.as_deref(), Some(output_file.as_str()));

        let output = sheet::load_sheet(&output_file).unwrap();
        assert_eq!(output.columns, vec!["Name", "Category"]);
        let names: Vec<&str> = output.rows.iter().map(|r| r.cell("Name").unwrap()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_template_column_missing_from_sheet_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "in.csv", "Other,Status\nx,done\n");
        let config = test_config(&dir, "in.csv");

        let engine = EtlEngine::new(CannedApi::new("{}"), config);
        let err = engine.run().await.unwrap_err();

        match err {
            EtlError::TemplateError { column } => assert_eq!(column, "Name"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_skip_column_disables_filtering() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "in.csv", "Name\nalpha\nbeta\n");
        let mut config = test_config(&dir, "in.csv");
        config.source.empty_column = Some("Nope".to_string());

        let engine = EtlEngine::new(CannedApi::new("{\"Category\": \"X\"}"), config);
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.eligible_rows, 2);
        assert_eq!(summary.skipped_rows, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "in.csv", "Name,Status\nalpha,done\n");
        let config = test_config(&dir, "in.csv");
        let output_file = config.output.file.clone();

        let engine = EtlEngine::new(CannedApi::new("{\"Category\": \"X\"}"), config);
        engine.cancel_flag().store(true, Ordering::SeqCst);

        let summary = engine.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.output_path, None);
        assert_eq!(summary.rows_succeeded, 0);
        assert_eq!(summary.batches_completed, 0);
        assert!(!std::path::Path::new(&output_file).exists());
    }

    /// complete() 把引擎自己的取消旗標立起來，模擬跑到一半被 Ctrl-C
    struct TripwireApi {
        flag: Arc<OnceLock<Arc<AtomicBool>>>,
    }

    impl ChatApi for TripwireApi {
        async fn complete(&self, _prompt: &str) -> EtlResult<String> {
            if let Some(flag) = self.flag.get() {
                flag.store(true, Ordering::SeqCst);
            }
            Ok("{\"Category\": \"X\"}".to_string())
        }
    }

    #[tokio::test]
    async fn test_mid_run_cancellation_counts_whole_batches() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "in.csv",
            "Name,Status\nalpha,done\nbeta,done\ngamma,done\ndelta,done\n",
        );
        let mut config = test_config(&dir, "in.csv");
        // 單一 worker 讓批次依序跑：第一批觸發取消後第二批必須跳過
        config.processing.as_mut().unwrap().workers = Some(1);

        let slot: Arc<OnceLock<Arc<AtomicBool>>> = Arc::new(OnceLock::new());
        let api = TripwireApi {
            flag: Arc::clone(&slot),
        };
        let engine = EtlEngine::new(api, config);
        slot.set(engine.cancel_flag()).unwrap();

        let summary = engine.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        // 第一批的兩列都跑完，批次數卻只算一批
        assert_eq!(summary.rows_succeeded + summary.rows_failed, 2);
        assert_eq!(summary.batches_completed, 1);
        assert_eq!(summary.batches_total, 2);
        assert_eq!(summary.output_path, None);
    }

    #[tokio::test]
    async fn test_all_rows_skipped_still_writes_header() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "in.csv", "Name,Status\nalpha,\nbeta,  \n");
        let config = test_config(&dir, "in.csv");
        let output_file = config.output.file.clone();

        let engine = EtlEngine::new(CannedApi::new("{\"Category\": \"X\"}"), config);
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.eligible_rows, 0);
        assert_eq!(summary.skipped_rows, 2);

        let output = sheet::load_sheet(&output_file).unwrap();
        assert_eq!(output.columns, vec!["Name", "Category"]);
        assert!(output.rows.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_loading() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir, "in.csv");
        config.api.url = "not-a-url".to_string();

        // 輸入檔刻意不存在：驗證必須先於讀檔失敗
        let engine = EtlEngine::new(CannedApi::new("{}"), config);
        let err = engine.run().await.unwrap_err();

        assert!(matches!(err, EtlError::InvalidConfigValueError { .. }));
    }
}
