pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod sheet;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use api::ChatClient;
pub use config::JobConfig;
pub use core::engine::EtlEngine;
pub use domain::model::{ProgressEvent, RunStatus, RunSummary};
pub use domain::ports::{ChatApi, ProgressSink};
pub use utils::error::{EtlError, Result};
