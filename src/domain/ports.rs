use crate::domain::model::ProgressEvent;
use crate::utils::error::Result;

/// Seam to the remote chat-completion API. One call per prompt; the
/// implementation maps transport and HTTP failures to typed errors and
/// never retries.
pub trait ChatApi: Send + Sync {
    fn complete(&self, prompt: &str) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Receives one event per finished batch. Implemented for plain closures so
/// front-ends can pass `|event| ...` directly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}
