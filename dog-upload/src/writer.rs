use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::{BlockId, UploadCtx, UploadResult};

/// Remote block store capability consumed by the upload engine.
///
/// Implementations wrap a real network client or an in-memory fake; the
/// engine never depends on a concrete transport. Retries, if any, belong to
/// the implementation.
#[async_trait]
pub trait BlockWriter: Send + Sync {
    /// Upload one block to the staging area. Staged blocks are not visible in
    /// the blob until committed.
    async fn stage_block(
        &self,
        ctx: &UploadCtx,
        block_id: &BlockId,
        body: &[u8],
        options: &StageOptions,
    ) -> UploadResult<StageResponse>;

    /// Atomically replace the blob's content with the concatenation of the
    /// named staged blocks, in order. Unreferenced staged blocks are left to
    /// the store's garbage collection.
    async fn commit_block_list(
        &self,
        ctx: &UploadCtx,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> UploadResult<CommitResponse>;
}

/// Per-stage options
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    /// Hex SHA-256 of the body; the store must reject the block on mismatch
    pub content_sha256: Option<String>,
}

/// Options for the final commit
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    /// Hex SHA-256 of the whole content, when computed
    pub content_sha256: Option<String>,
}

/// Result of a successful stage call
#[derive(Debug, Clone, Default)]
pub struct StageResponse {
    pub content_sha256: Option<String>,
    pub request_id: Option<String>,
}

/// Result of a successful commit
#[derive(Debug, Clone, Default)]
pub struct CommitResponse {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
}

#[async_trait]
impl<W: BlockWriter + ?Sized> BlockWriter for std::sync::Arc<W> {
    async fn stage_block(
        &self,
        ctx: &UploadCtx,
        block_id: &BlockId,
        body: &[u8],
        options: &StageOptions,
    ) -> UploadResult<StageResponse> {
        (**self).stage_block(ctx, block_id, body, options).await
    }

    async fn commit_block_list(
        &self,
        ctx: &UploadCtx,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> UploadResult<CommitResponse> {
        (**self).commit_block_list(ctx, block_ids, options).await
    }
}
