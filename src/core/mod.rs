pub mod aggregate;
pub mod batch;
pub mod dispatcher;
pub mod engine;
pub mod parser;
pub mod template;

pub use crate::domain::model::{
    Batch, ProgressEvent, ResponseFormat, Row, RowOutcome, RowResult, RunStatus, RunSummary,
    Sheet, SkipPolicy,
};
pub use crate::domain::ports::{ChatApi, ProgressSink};
pub use crate::utils::error::Result;
