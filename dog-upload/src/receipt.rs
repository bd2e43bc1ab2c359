use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BlockId, UploadId};

/// Receipt returned after a block list was committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub upload_id: UploadId,
    pub block_count: u32,
    pub size_bytes: u64,
    pub block_size: usize,
    pub concurrency: usize,
    /// Committed block list, in content order
    pub block_ids: Vec<BlockId>,
    pub etag: Option<String>,
    /// Hex SHA-256 of the whole source, when requested
    pub content_sha256: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl UploadReceipt {
    /// Whether an empty source was committed
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }
}
