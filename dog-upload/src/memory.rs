//! In-memory block store for tests and development.
//!
//! Behaves like a block blob: staged blocks are invisible until a commit
//! names them, and a commit replaces the whole content. Latency, failures and
//! checksum corruption can be injected per block, and the store keeps gauges
//! of how many stage calls ran at once.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::writer::{BlockWriter, CommitOptions, CommitResponse, StageOptions, StageResponse};
use crate::{BlockId, UploadCtx, UploadError, UploadResult};

type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

#[derive(Clone, Default)]
struct Faults {
    stage_delay: Option<Duration>,
    delay_fn: Option<DelayFn>,
    fail_stage_on: Option<u32>,
    corrupt_stage_on: Option<u32>,
    fail_commit: bool,
}

/// Content and properties of the last successful commit
#[derive(Debug, Clone)]
pub struct CommittedBlob {
    pub block_ids: Vec<BlockId>,
    pub content: Bytes,
    pub options: CommitOptions,
    pub etag: String,
}

#[derive(Default)]
struct Inner {
    staged: Mutex<HashMap<BlockId, Bytes>>,
    committed: Mutex<Option<CommittedBlob>>,
    stage_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    active_stages: AtomicUsize,
    peak_stages: AtomicUsize,
}

/// Cheaply clonable handle; clones share the same blob
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    inner: Arc<Inner>,
    faults: Arc<Faults>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every stage call by `delay`
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        Arc::make_mut(&mut self.faults).stage_delay = Some(delay);
        self
    }

    /// Delay each stage call by a duration chosen from its block index
    pub fn with_stage_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.faults).delay_fn = Some(Arc::new(delay));
        self
    }

    /// Reject the stage call for the block at `index`
    pub fn fail_stage_on(mut self, index: u32) -> Self {
        Arc::make_mut(&mut self.faults).fail_stage_on = Some(index);
        self
    }

    /// Flip a byte of the block at `index` in transit, so its checksum no longer matches
    pub fn corrupt_stage_on(mut self, index: u32) -> Self {
        Arc::make_mut(&mut self.faults).corrupt_stage_on = Some(index);
        self
    }

    /// Reject every commit
    pub fn fail_commit(mut self) -> Self {
        Arc::make_mut(&mut self.faults).fail_commit = true;
        self
    }

    pub fn stage_calls(&self) -> usize {
        self.inner.stage_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.inner.commit_calls.load(Ordering::SeqCst)
    }

    /// Most stage calls observed in flight at the same time
    pub fn peak_concurrent_stages(&self) -> usize {
        self.inner.peak_stages.load(Ordering::SeqCst)
    }

    pub fn active_stages(&self) -> usize {
        self.inner.active_stages.load(Ordering::SeqCst)
    }

    /// Blocks staged and not yet committed or discarded
    pub fn staged_block_count(&self) -> usize {
        self.inner.staged.lock().len()
    }

    pub fn committed(&self) -> Option<CommittedBlob> {
        self.inner.committed.lock().clone()
    }

    /// Visible blob content, if anything was committed
    pub fn read_blob(&self) -> Option<Bytes> {
        self.inner.committed.lock().as_ref().map(|c| c.content.clone())
    }

    fn delay_for(&self, index: Option<u32>) -> Option<Duration> {
        let per_block = match (&self.faults.delay_fn, index) {
            (Some(delay), Some(index)) => Some(delay(index)),
            _ => None,
        };
        match (self.faults.stage_delay, per_block) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        }
    }
}

/// Decrements the in-flight gauge however the stage call ends
struct ActiveStage<'a>(&'a AtomicUsize);

impl<'a> ActiveStage<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveStage<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn injected(message: String) -> UploadError {
    UploadError::backend(std::io::Error::new(std::io::ErrorKind::Other, message))
}

#[async_trait]
impl BlockWriter for MemoryBlockStore {
    async fn stage_block(
        &self,
        ctx: &UploadCtx,
        block_id: &BlockId,
        body: &[u8],
        options: &StageOptions,
    ) -> UploadResult<StageResponse> {
        self.inner.stage_calls.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveStage::enter(&self.inner.active_stages, &self.inner.peak_stages);

        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let index = block_id.index();
        if let Some(delay) = self.delay_for(index) {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                err = ctx.done() => return Err(err),
            }
        }

        if index.is_some() && index == self.faults.fail_stage_on {
            return Err(injected(format!("injected stage failure for block {}", block_id)));
        }

        let mut received = Bytes::copy_from_slice(body);
        if index.is_some() && index == self.faults.corrupt_stage_on && !received.is_empty() {
            let mut corrupted = received.to_vec();
            corrupted[0] ^= 0xff;
            received = Bytes::from(corrupted);
        }

        let digest = hex::encode(Sha256::digest(&received));
        if let Some(expected) = &options.content_sha256 {
            if *expected != digest {
                return Err(UploadError::ChecksumMismatch {
                    block_id: block_id.to_string(),
                });
            }
        }

        debug!(block_id = %block_id, size = received.len(), "Staged block");
        self.inner.staged.lock().insert(block_id.clone(), received);

        Ok(StageResponse {
            content_sha256: Some(digest),
            request_id: ctx.request_id.clone(),
        })
    }

    async fn commit_block_list(
        &self,
        ctx: &UploadCtx,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> UploadResult<CommitResponse> {
        self.inner.commit_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if self.faults.fail_commit {
            return Err(injected("injected commit failure".to_string()));
        }

        let mut staged = self.inner.staged.lock();
        let mut content = Vec::new();
        for id in block_ids {
            let block = staged
                .get(id)
                .ok_or_else(|| UploadError::invalid(format!("Block {} was never staged", id)))?;
            content.extend_from_slice(block);
        }

        if let Some(expected) = &options.content_sha256 {
            if *expected != hex::encode(Sha256::digest(&content)) {
                return Err(UploadError::invalid("Content digest does not match committed blocks"));
            }
        }

        // Committing discards every uncommitted block.
        staged.clear();
        drop(staged);

        let etag = format!("\"{}\"", Uuid::new_v4().simple());
        *self.inner.committed.lock() = Some(CommittedBlob {
            block_ids: block_ids.to_vec(),
            content: Bytes::from(content),
            options: options.clone(),
            etag: etag.clone(),
        });

        Ok(CommitResponse {
            etag: Some(etag),
            last_modified: Some(Utc::now()),
            request_id: ctx.request_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockIdGenerator;

    #[tokio::test]
    async fn test_stage_is_invisible_until_commit() {
        let store = MemoryBlockStore::new();
        let ctx = UploadCtx::new();
        let ids = BlockIdGenerator::new();

        store.stage_block(&ctx, &ids.block_id(0), b"hello ", &StageOptions::default()).await.unwrap();
        store.stage_block(&ctx, &ids.block_id(1), b"world", &StageOptions::default()).await.unwrap();
        assert!(store.read_blob().is_none());
        assert_eq!(store.staged_block_count(), 2);

        let order = [ids.block_id(1), ids.block_id(0)];
        store.commit_block_list(&ctx, &order, &CommitOptions::default()).await.unwrap();
        assert_eq!(store.read_blob().unwrap(), Bytes::from_static(b"worldhello "));
        assert_eq!(store.staged_block_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_unknown_block() {
        let store = MemoryBlockStore::new();
        let ids = BlockIdGenerator::new();
        let result = store
            .commit_block_list(&UploadCtx::new(), &[ids.block_id(0)], &CommitOptions::default())
            .await;
        assert!(matches!(result, Err(UploadError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let store = MemoryBlockStore::new().corrupt_stage_on(0);
        let ids = BlockIdGenerator::new();
        let options = StageOptions {
            content_sha256: Some(hex::encode(Sha256::digest(b"abc"))),
        };

        let result = store.stage_block(&UploadCtx::new(), &ids.block_id(0), b"abc", &options).await;
        assert!(matches!(result, Err(UploadError::ChecksumMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_observes_cancellation() {
        let store = MemoryBlockStore::new().with_stage_delay(Duration::from_secs(60));
        let ctx = UploadCtx::new().with_timeout(Duration::from_millis(10));
        let ids = BlockIdGenerator::new();

        let result = store.stage_block(&ctx, &ids.block_id(0), b"x", &StageOptions::default()).await;
        assert!(matches!(result, Err(UploadError::DeadlineExceeded)));
        assert_eq!(store.active_stages(), 0);
    }
}
