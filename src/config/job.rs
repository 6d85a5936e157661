use crate::domain::model::{ResponseFormat, SkipPolicy};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job: JobInfo,
    pub source: SourceConfig,
    pub api: ApiConfig,
    pub templates: TemplateConfig,
    pub processing: Option<ProcessingConfig>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    /// Input columns carried into the output artifact, keyed by column name.
    /// Unlisted columns default to not selected.
    #[serde(default)]
    pub columns: HashMap<String, bool>,
    /// Rows with a blank cell in this column are skipped before batching.
    pub empty_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub key: String,
    pub model: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Per-row content template using `{row['Column']}` placeholders.
    pub content: String,
    /// Prompt template using the `{{content}}` placeholder.
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub response_format: Option<ResponseFormat>,
    pub skip_policy: Option<SkipPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub file: String,
    pub columns: Vec<String>,
}

impl JobConfig {
    /// 從 TOML 檔案載入工作設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析工作設定
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ARK_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        // 使用正規表達式匹配 ${VAR_NAME} 格式
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證設定的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("job.name", &self.job.name)?;

        // 輸入與輸出檔案
        validation::validate_path("source.file", &self.source.file)?;
        validation::validate_file_extension("source.file", &self.source.file, &["csv"])?;
        validation::validate_path("output.file", &self.output.file)?;
        validation::validate_file_extension("output.file", &self.output.file, &["csv"])?;

        // API 端點與憑證
        validation::validate_url("api.url", &self.api.url)?;
        if self.api.key.starts_with("${") {
            // 環境變數沒有被替換，代表它沒有被設定
            return Err(EtlError::MissingConfigError {
                field: "api.key".to_string(),
            });
        }
        validation::validate_non_empty_string("api.key", &self.api.key)?;
        validation::validate_non_empty_string("api.model", &self.api.model)?;
        validation::validate_range("api.timeout_secs", self.api_timeout().as_secs(), 1, 3600)?;

        // 模板
        validation::validate_non_empty_string("templates.content", &self.templates.content)?;
        validation::validate_non_empty_string("templates.prompt", &self.templates.prompt)?;

        // 併發參數
        validation::validate_positive_number("processing.batch_size", self.batch_size(), 1)?;
        validation::validate_positive_number("processing.workers", self.workers(), 1)?;

        // 輸出欄位
        if self.output.columns.is_empty() {
            return Err(EtlError::InvalidConfigValueError {
                field: "output.columns".to_string(),
                value: "[]".to_string(),
                reason: "At least one output column is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for column in &self.output.columns {
            validation::validate_non_empty_string("output.columns", column)?;
            if !seen.insert(column.as_str()) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "output.columns".to_string(),
                    value: column.clone(),
                    reason: "Duplicate output column".to_string(),
                });
            }
            if self.is_selected(column) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "output.columns".to_string(),
                    value: column.clone(),
                    reason: "Output column collides with a selected input column".to_string(),
                });
            }
        }

        Ok(())
    }

    /// 是否將此輸入欄位帶入輸出
    pub fn is_selected(&self, column: &str) -> bool {
        self.source.columns.get(column).copied().unwrap_or(false)
    }

    pub fn batch_size(&self) -> usize {
        self.processing
            .as_ref()
            .and_then(|p| p.batch_size)
            .unwrap_or(20)
    }

    pub fn workers(&self) -> usize {
        self.processing
            .as_ref()
            .and_then(|p| p.workers)
            .unwrap_or(10)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs.unwrap_or(180))
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.processing
            .as_ref()
            .and_then(|p| p.response_format)
            .unwrap_or_default()
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        self.processing
            .as_ref()
            .and_then(|p| p.skip_policy)
            .unwrap_or_default()
    }
}

impl Validate for JobConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
