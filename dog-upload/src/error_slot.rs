use parking_lot::Mutex;
use tracing::warn;

use crate::{UploadCtx, UploadError};

/// Single-assignment cell for a session's terminal error.
///
/// The first recorded error is kept and cancels the session context; every
/// later record is discarded.
pub struct ErrorSlot {
    slot: Mutex<Option<UploadError>>,
    ctx: UploadCtx,
}

impl ErrorSlot {
    /// Slot bound to the session scope it cancels
    pub fn new(ctx: UploadCtx) -> Self {
        Self {
            slot: Mutex::new(None),
            ctx,
        }
    }

    /// Record `err` if nothing was recorded yet. Returns whether it was kept.
    pub fn record(&self, err: UploadError) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        warn!(error = %err, "Upload failed, canceling remaining work");
        *slot = Some(err);
        drop(slot);

        self.ctx.cancel();
        true
    }

    /// Whether an explicit error was recorded
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The recorded error, else the context's cancellation or deadline, else none.
    pub fn get_err(&self) -> Option<UploadError> {
        if let Some(err) = self.slot.lock().clone() {
            return Some(err);
        }
        self.ctx.err()
    }
}
