use std::future::Future;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::progress::ProgressTracker;
use crate::types::UserIdentity;

/// Everything scoped to one presentation-surface call, passed explicitly
/// down through auth, catalog and download code.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: UserIdentity,
    pub request_id: Uuid,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressTracker>,
}

impl RequestContext {
    pub fn new(identity: UserIdentity, cancel: CancellationToken) -> Self {
        Self {
            identity,
            request_id: Uuid::new_v4(),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run `fut` unless the context is cancelled first. `None` means
    /// cancelled; the future is dropped at that point.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        self.cancel.run_until_cancelled(fut).await
    }

    /// Report a sub-count on the active progress phase, if any.
    pub async fn count(&self, key: &str, value: f64) {
        if let Some(progress) = &self.progress {
            progress.count(key, value).await;
        }
    }

    pub async fn set_phase(&self, phase: crate::progress::Phase, total: usize) {
        if let Some(progress) = &self.progress {
            progress.set_phase(phase, total).await;
        }
    }
}
