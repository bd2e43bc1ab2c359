use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::UploadError;

/// Cancellation scope and deadline for an upload.
///
/// Cloning shares the same scope; [`UploadCtx::child`] creates a scope that is
/// canceled with its parent but can also be canceled on its own.
#[derive(Debug, Clone)]
pub struct UploadCtx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    pub tenant_id: Option<String>,
    pub request_id: Option<String>,
}

impl UploadCtx {
    /// A context that is never canceled unless asked
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            tenant_id: None,
            request_id: None,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Expire after `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline`, keeping the earlier of the two if one is already set
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_tenant(mut self, tenant_id: String) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// A nested scope canceled whenever this one is
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            tenant_id: self.tenant_id.clone(),
            request_id: self.request_id.clone(),
        }
    }

    /// Cancel this scope and every child
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The context's own error: canceled, deadline exceeded, or none
    pub fn err(&self) -> Option<UploadError> {
        if self.cancel.is_cancelled() {
            return Some(UploadError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(UploadError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is canceled or its deadline passes
    pub async fn done(&self) -> UploadError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => UploadError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => UploadError::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                UploadError::Canceled
            }
        }
    }
}

impl Default for UploadCtx {
    fn default() -> Self {
        Self::new()
    }
}
