use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::writer::{BlockWriter, CommitOptions, CommitResponse};
use crate::{BlockId, StagedBlock, UploadCtx, UploadError, UploadResult};

/// Collects staged blocks as workers confirm them and issues the single commit
#[derive(Default)]
pub struct Committer {
    staged: Mutex<Vec<StagedBlock>>,
    committed: AtomicBool,
}

impl Committer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a block the writer confirmed
    pub fn record(&self, block: StagedBlock) {
        self.staged.lock().push(block);
    }

    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    pub fn staged_bytes(&self) -> u64 {
        self.staged.lock().iter().map(|b| b.size as u64).sum()
    }

    /// Block IDs in index order.
    ///
    /// Fails if the staged indices are not exactly `0..n`.
    pub fn block_list(&self) -> UploadResult<Vec<BlockId>> {
        let mut staged = self.staged.lock().clone();
        staged.sort_by_key(|b| b.index);

        for (position, block) in staged.iter().enumerate() {
            if block.index as usize != position {
                return Err(UploadError::Internal(format!(
                    "staged blocks are not contiguous: expected index {}, found {}",
                    position, block.index
                )));
            }
        }

        Ok(staged.into_iter().map(|b| b.block_id).collect())
    }

    /// Commit the ordered block list. Only the first call reaches the writer.
    pub async fn commit<W>(
        &self,
        ctx: &UploadCtx,
        writer: &W,
        options: &CommitOptions,
    ) -> UploadResult<(Vec<BlockId>, CommitResponse)>
    where
        W: BlockWriter + ?Sized,
    {
        if self.committed.swap(true, Ordering::SeqCst) {
            return Err(UploadError::Internal("block list already committed".to_string()));
        }

        let block_ids = self.block_list()?;
        debug!(blocks = block_ids.len(), "Committing block list");

        let response = writer
            .commit_block_list(ctx, &block_ids, options)
            .await
            .map_err(UploadError::commit)?;

        info!(blocks = block_ids.len(), etag = ?response.etag, "Committed block list");
        Ok((block_ids, response))
    }
}
