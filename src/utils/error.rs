use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Template references unknown column '{column}'")]
    TemplateError { column: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Authentication rejected by API: {message}")]
    AuthError { message: String },

    #[error("API rate limit exceeded: {message}")]
    RateLimitError { message: String },

    #[error("Malformed API response: {message}")]
    MalformedResponseError { message: String },

    #[error("Response parsing failed: {message}")]
    ParseError { message: String },

    #[error("Run cancelled")]
    Cancelled,
}

/// 錯誤嚴重程度，決定 CLI 退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// 正常終止 (例如使用者取消)
    Low,
    /// 單行/單批可恢復的錯誤
    Medium,
    /// 執行失敗，需要修正設定或輸入
    High,
    /// 系統層級錯誤 (IO、檔案損毀)
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Config,
    Template,
    Api,
    Parse,
    Cancel,
}

impl EtlError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::IoError(_) | EtlError::CsvError(_) => ErrorSeverity::Critical,
            EtlError::SerializationError(_) => ErrorSeverity::High,
            EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::TemplateError { .. } => ErrorSeverity::High,
            EtlError::NetworkError { .. }
            | EtlError::AuthError { .. }
            | EtlError::RateLimitError { .. }
            | EtlError::MalformedResponseError { .. }
            | EtlError::ParseError { .. } => ErrorSeverity::Medium,
            EtlError::Cancelled => ErrorSeverity::Low,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::IoError(_) | EtlError::CsvError(_) => ErrorCategory::Io,
            EtlError::SerializationError(_) => ErrorCategory::Api,
            EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Config,
            EtlError::TemplateError { .. } => ErrorCategory::Template,
            EtlError::NetworkError { .. }
            | EtlError::AuthError { .. }
            | EtlError::RateLimitError { .. }
            | EtlError::MalformedResponseError { .. } => ErrorCategory::Api,
            EtlError::ParseError { .. } => ErrorCategory::Parse,
            EtlError::Cancelled => ErrorCategory::Cancel,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::IoError(_) => {
                "Check that the input file exists and the output directory is writable".to_string()
            }
            EtlError::CsvError(_) => {
                "Check that the input file is valid CSV with a header row".to_string()
            }
            EtlError::SerializationError(_) => {
                "Check the API endpoint returns the expected JSON shape".to_string()
            }
            EtlError::InvalidConfigValueError { field, .. } => {
                format!("Fix the value of '{}' in the job file", field)
            }
            EtlError::MissingConfigError { field } => format!(
                "Add '{}' to the job file or export the referenced environment variable",
                field
            ),
            EtlError::ConfigValidationError { field, .. } => {
                format!("Review the '{}' section of the job file", field)
            }
            EtlError::TemplateError { column } => format!(
                "Remove '{{row['{}']}}' from the content template or add the column to the input file",
                column
            ),
            EtlError::NetworkError { .. } => {
                "Check the API URL, network connectivity and the configured timeout".to_string()
            }
            EtlError::AuthError { .. } => {
                "Check that the API key is valid and not expired".to_string()
            }
            EtlError::RateLimitError { .. } => {
                "Reduce the worker count or re-run later".to_string()
            }
            EtlError::MalformedResponseError { .. } => {
                "Check that the API URL points at a chat-completions endpoint".to_string()
            }
            EtlError::ParseError { .. } => {
                "Tighten the prompt template or switch the response format".to_string()
            }
            EtlError::Cancelled => "Re-run the job to process the remaining rows".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::IoError(e) => format!("File access failed: {}", e),
            EtlError::CsvError(e) => format!("Could not read the tabular file: {}", e),
            EtlError::SerializationError(e) => format!("Data conversion failed: {}", e),
            EtlError::InvalidConfigValueError { field, reason, .. } => {
                format!("The job file setting '{}' is invalid: {}", field, reason)
            }
            EtlError::MissingConfigError { field } => {
                format!("The job file is missing the required setting '{}'", field)
            }
            EtlError::ConfigValidationError { field, message } => {
                format!("The job file section '{}' is invalid: {}", field, message)
            }
            EtlError::TemplateError { column } => format!(
                "The content template uses the column '{}' which does not exist in the input file",
                column
            ),
            EtlError::NetworkError { message } => format!("Could not reach the API: {}", message),
            EtlError::AuthError { message } => format!("The API rejected the key: {}", message),
            EtlError::RateLimitError { message } => {
                format!("The API is rate limiting requests: {}", message)
            }
            EtlError::MalformedResponseError { message } => {
                format!("The API reply was not understood: {}", message)
            }
            EtlError::ParseError { message } => {
                format!("The model reply did not contain the expected fields: {}", message)
            }
            EtlError::Cancelled => "The run was cancelled before completion".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
