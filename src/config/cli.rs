use crate::config::job::JobConfig;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "llm-etl")]
#[command(about = "Batch LLM enrichment for tabular files")]
pub struct CliArgs {
    /// Path to the TOML job file
    #[arg(short, long, default_value = "job.toml")]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Validate the job and show what would be processed without calling the API
    #[arg(long)]
    pub dry_run: bool,

    /// Log process CPU/memory stats at run phases
    #[arg(long)]
    pub monitor: bool,

    /// Override the worker count from the job file
    #[arg(long)]
    pub workers: Option<usize>,

    /// Override the batch size from the job file
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Override the output file from the job file
    #[arg(long)]
    pub output: Option<String>,
}

impl CliArgs {
    /// 將命令列覆蓋值套用到工作設定
    pub fn apply_overrides(&self, config: &mut JobConfig) {
        if let Some(workers) = self.workers {
            config.processing.get_or_insert_with(Default::default).workers = Some(workers);
            tracing::info!("🔧 Worker count overridden to: {}", workers);
        }

        if let Some(batch_size) = self.batch_size {
            config
                .processing
                .get_or_insert_with(Default::default)
                .batch_size = Some(batch_size);
            tracing::info!("🔧 Batch size overridden to: {}", batch_size);
        }

        if let Some(output) = &self.output {
            config.output.file = output.clone();
            tracing::info!("🔧 Output file overridden to: {}", output);
        }
    }
}
