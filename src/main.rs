use clap::Parser;
use llm_etl::config::CliArgs;
use llm_etl::core::{batch, template};
use llm_etl::utils::{logger, validation::Validate};
use llm_etl::{ChatClient, EtlEngine, JobConfig, ProgressEvent, RunStatus, RunSummary};
use std::sync::atomic::Ordering;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.log_json {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting llm-etl");
    tracing::info!("📁 Loading job configuration from: {}", args.config);

    // 載入工作設定
    let mut config = match JobConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load job file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 套用命令列覆蓋設定
    args.apply_overrides(&mut config);

    // 驗證設定
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");

    // 顯示工作摘要
    display_job_summary(&config, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No API calls will be made");
        perform_dry_run(&config)?;
        return Ok(());
    }

    if args.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    // 建立 API 客戶端與引擎
    let client = ChatClient::new(
        config.api.url.clone(),
        config.api.key.clone(),
        config.api.model.clone(),
        config.api_timeout(),
    )?;
    let engine = EtlEngine::new_with_monitoring(client, config, args.monitor);

    // Ctrl-C 優雅取消：跳過未開始的批次，讓進行中的請求自然結束
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Cancellation requested; letting in-flight requests finish");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let progress = |event: ProgressEvent| {
        tracing::info!(
            "⏳ Batch {}/{} done ({} rows ok, {} failed)",
            event.batches_done,
            event.batches_total,
            event.rows_succeeded,
            event.rows_failed
        );
    };

    match engine.run_with_progress(&progress).await {
        Ok(summary) => display_run_summary(&summary),
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            // 輸出用戶友好的錯誤信息
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                llm_etl::utils::error::ErrorSeverity::Low => 0, // 取消或警告
                llm_etl::utils::error::ErrorSeverity::Medium => 2, // 批次層級錯誤
                llm_etl::utils::error::ErrorSeverity::High => 1, // 設定或模板錯誤
                llm_etl::utils::error::ErrorSeverity::Critical => 3, // 系統錯誤
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

fn display_job_summary(config: &JobConfig, args: &CliArgs) {
    println!("📋 Job Summary:");
    println!("  Job: {}", config.job.name);
    if let Some(description) = &config.job.description {
        println!("  Description: {}", description);
    }
    println!("  Input: {}", config.source.file);
    println!("  Output: {}", config.output.file);
    println!("  API: {} ({})", config.api.url, config.api.model);
    println!(
        "  Batch size: {} / Workers: {} / Timeout: {}s",
        config.batch_size(),
        config.workers(),
        config.api_timeout().as_secs()
    );
    println!("  Response format: {:?}", config.response_format());
    println!("  Output columns: {}", config.output.columns.join(", "));

    if let Some(empty_column) = &config.source.empty_column {
        println!("  Skip-check column: {}", empty_column);
    }

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

fn perform_dry_run(config: &JobConfig) -> llm_etl::Result<()> {
    println!("🔍 Dry Run Analysis:");
    println!();

    // 輸入分析
    let input = llm_etl::sheet::load_sheet(&config.source.file)?;
    println!("📡 Input Analysis:");
    println!(
        "  Sheet: {} ({} columns, {} rows)",
        input.name,
        input.columns.len(),
        input.rows.len()
    );
    println!("  Columns: {}", input.columns.join(", "));

    // 模板分析
    println!();
    println!("🧩 Template Analysis:");
    let referenced = template::template_columns(&config.templates.content);
    if referenced.is_empty() {
        println!("  Referenced columns: (none)");
    } else {
        let marks: Vec<String> = referenced
            .iter()
            .map(|column| {
                if input.columns.contains(column) {
                    format!("{} ✅", column)
                } else {
                    format!("{} ❌ missing", column)
                }
            })
            .collect();
        println!("  Referenced columns: {}", marks.join(", "));
    }
    if config
        .templates
        .prompt
        .contains(template::CONTENT_PLACEHOLDER)
    {
        println!("  Prompt placeholder: present");
    } else {
        println!("  Prompt placeholder: ⚠️ missing (prompt will be sent verbatim)");
    }

    // 處理計畫
    println!();
    println!("⚙️ Processing Plan:");
    let empty_column = config
        .source
        .empty_column
        .as_ref()
        .filter(|column| input.columns.contains(*column));
    let (eligible, skipped) = batch::partition_rows(&input.rows, empty_column.map(|c| c.as_str()));
    match &config.source.empty_column {
        Some(column) if empty_column.is_some() => {
            println!(
                "  Eligible rows: {} ({} skipped by '{}')",
                eligible.len(),
                skipped.len(),
                column
            );
        }
        Some(column) => {
            println!(
                "  Eligible rows: {} (skip-check column '{}' not in sheet)",
                eligible.len(),
                column
            );
        }
        None => println!("  Eligible rows: {}", eligible.len()),
    }
    let batches = batch::make_batches(&eligible, config.batch_size())?;
    println!(
        "  Batches: {} of up to {} rows",
        batches.len(),
        config.batch_size()
    );
    println!("  Concurrent workers: {}", config.workers());

    println!();
    println!("✅ Dry run analysis complete. No API calls were made.");

    Ok(())
}

fn display_run_summary(summary: &RunSummary) {
    match summary.status {
        RunStatus::Completed => {
            tracing::info!("✅ Run completed successfully!");
            println!("✅ Run completed successfully!");
            println!(
                "📊 {} rows processed: {} ok, {} failed ({} of {} batches had failures)",
                summary.eligible_rows,
                summary.rows_succeeded,
                summary.rows_failed,
                summary.batches_failed,
                summary.batches_total
            );
            if summary.skipped_rows > 0 {
                println!("⏭️ {} rows skipped by the skip-check column", summary.skipped_rows);
            }
            if summary.rows_failed > 0 {
                println!("⚠️ Failed rows are marked in the output; fix the cause and re-run");
            }
            if let Some(output_path) = &summary.output_path {
                tracing::info!("📁 Output saved to: {}", output_path);
                println!("📁 Output saved to: {}", output_path);
            }
        }
        RunStatus::Cancelled => {
            tracing::warn!("🛑 Run cancelled");
            println!(
                "🛑 Run cancelled after {} of {} batches; no output written",
                summary.batches_completed, summary.batches_total
            );
        }
    }
}
