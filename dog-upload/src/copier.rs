use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tracing::{debug, error, instrument, Instrument};

use crate::committer::Committer;
use crate::config::{ProgressFn, TransferValidation, UploadOptions};
use crate::error_slot::ErrorSlot;
use crate::splitter::ChunkSplitter;
use crate::transfer::{default_transfer_manager, BufferLease, TransferManager};
use crate::writer::{BlockWriter, CommitOptions, StageOptions};
use crate::{
    BlockIdGenerator, SessionState, StagedBlock, UploadCtx, UploadError, UploadId, UploadReceipt,
    UploadResult,
};

/// One streamed upload: splits the source, stages blocks with a bounded set
/// of workers and commits the block list once every block is staged.
///
/// A session runs at most once and ends in exactly one of
/// [`SessionState::Committed`], [`SessionState::Failed`] or
/// [`SessionState::Canceled`].
pub struct Copier<R> {
    id: UploadId,
    shared: Arc<Shared<R>>,
    options: UploadOptions,
    owns_pool: bool,
    state: Mutex<SessionState>,
}

/// State every worker sees
struct Shared<R> {
    ctx: UploadCtx,
    splitter: ChunkSplitter<R>,
    writer: Arc<dyn BlockWriter>,
    pool: Arc<dyn TransferManager>,
    errors: ErrorSlot,
    committer: Committer,
    validation: TransferValidation,
    progress: Option<ProgressFn>,
    transferred: Mutex<u64>,
}

/// Cancels the session scope if the session future is dropped early
struct CancelOnDrop(UploadCtx);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl<R> Copier<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Prepare a session reading from `reader`.
    ///
    /// Options are validated here, before any byte is read. The session runs
    /// in a child of `ctx`, so canceling `ctx` stops it while a failure inside
    /// the session never cancels the caller.
    pub fn new(
        ctx: &UploadCtx,
        reader: R,
        writer: Arc<dyn BlockWriter>,
        options: UploadOptions,
    ) -> UploadResult<Self> {
        let options = options.validate()?;

        let (pool, owns_pool) = match &options.transfer_manager {
            Some(pool) => (pool.clone(), false),
            None => (default_transfer_manager(options.concurrency, options.block_size)?, true),
        };

        let mut splitter = ChunkSplitter::new(reader, options.block_size, BlockIdGenerator::new());
        if options.compute_content_digest {
            splitter = splitter.with_digest();
        }

        let session_ctx = ctx.child();
        let shared = Shared {
            errors: ErrorSlot::new(session_ctx.clone()),
            ctx: session_ctx,
            splitter,
            writer,
            pool,
            committer: Committer::new(),
            validation: options.transactional_validation,
            progress: options.progress.clone(),
            transferred: Mutex::new(0),
        };

        Ok(Self {
            id: UploadId::new(),
            shared: Arc::new(shared),
            options,
            owns_pool,
            state: Mutex::new(SessionState::Idle),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_max_blocks(self, max_blocks: u32) -> Self {
        let Self {
            id,
            shared,
            options,
            owns_pool,
            state,
        } = self;
        let shared = match Arc::try_unwrap(shared) {
            Ok(mut shared) => {
                shared.splitter = shared.splitter.with_max_blocks(max_blocks);
                Arc::new(shared)
            }
            Err(shared) => shared,
        };
        Self {
            id,
            shared,
            options,
            owns_pool,
            state,
        }
    }

    pub fn id(&self) -> &UploadId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Options after defaults were applied
    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Stage every chunk of the source and commit the block list.
    ///
    /// Returns the first recorded failure if any worker or the commit failed,
    /// otherwise the context's cancellation or deadline error if it fired.
    #[instrument(
        skip_all,
        fields(
            upload_id = %self.id,
            block_size = self.options.block_size,
            concurrency = self.options.concurrency,
        )
    )]
    pub async fn run(&self) -> UploadResult<UploadReceipt> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                return Err(UploadError::Internal(format!(
                    "session {} already started",
                    self.id
                )));
            }
            *state = SessionState::Staging;
        }
        debug!(pool = self.shared.pool.kind(), "Session staging");

        let started = Instant::now();
        let _guard = CancelOnDrop(self.shared.ctx.clone());

        let result = self.stage_and_commit(started).await;

        if self.owns_pool {
            self.shared.pool.close();
        }

        match &result {
            Ok(_) => self.transition(SessionState::Committed),
            Err(err) if err.is_cancellation() => self.transition(SessionState::Canceled),
            Err(err) => {
                error!(error = %err, "Upload failed");
                self.transition(SessionState::Failed);
            }
        }
        result
    }

    async fn stage_and_commit(&self, started: Instant) -> UploadResult<UploadReceipt> {
        let handles: Vec<_> = (0..self.options.concurrency)
            .map(|worker| {
                let shared = self.shared.clone();
                tokio::spawn(async move { shared.work(worker).await }.in_current_span())
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                self.shared
                    .errors
                    .record(UploadError::Internal(format!("Worker join error: {}", e)));
            }
        }

        if let Some(err) = self.shared.errors.get_err() {
            return Err(err);
        }

        self.transition(SessionState::Committing);
        let shared = &self.shared;
        let commit_options = CommitOptions {
            content_type: self.options.commit.content_type.clone(),
            metadata: self.options.commit.metadata.clone(),
            tags: self.options.commit.tags.clone(),
            content_sha256: shared.splitter.finish_digest().await,
        };

        let committed = tokio::select! {
            biased;
            err = shared.ctx.done() => Err(err),
            result = shared.committer.commit(&shared.ctx, shared.writer.as_ref(), &commit_options) => result,
        };

        let (block_ids, response) = match committed {
            Ok(committed) => committed,
            Err(err) => {
                shared.fail(err);
                return Err(shared
                    .errors
                    .get_err()
                    .unwrap_or_else(|| UploadError::Internal("commit failed without an error".to_string())));
            }
        };

        Ok(UploadReceipt {
            upload_id: self.id.clone(),
            block_count: block_ids.len() as u32,
            size_bytes: shared.splitter.bytes_read().await,
            block_size: self.options.block_size,
            concurrency: self.options.concurrency,
            block_ids,
            etag: response.etag,
            content_sha256: commit_options.content_sha256,
            committed_at: response.last_modified.unwrap_or_else(Utc::now),
            elapsed: started.elapsed(),
        })
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock();
        debug!(from = ?*state, to = ?next, "Session state change");
        *state = next;
    }
}

impl<R> Shared<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Record a failure unless it is only the echo of the session being canceled
    fn fail(&self, err: UploadError) {
        let cancellation =
            err.is_cancellation() || err.writer_error().map_or(false, UploadError::is_cancellation);
        if cancellation && self.ctx.is_done() {
            return;
        }
        self.errors.record(err);
    }

    /// Reports are serialized so the callback never sees the total go backwards
    fn report_progress(&self, size: usize) {
        if let Some(progress) = &self.progress {
            let mut transferred = self.transferred.lock();
            *transferred += size as u64;
            progress(*transferred);
        }
    }

    async fn work(&self, worker: usize) {
        loop {
            if self.errors.get_err().is_some() {
                return;
            }

            let mut lease = tokio::select! {
                lease = BufferLease::acquire(self.pool.clone()) => match lease {
                    Ok(lease) => lease,
                    Err(err) => return self.fail(err),
                },
                _ = self.ctx.done() => return,
            };

            let chunk = tokio::select! {
                chunk = self.splitter.next_chunk(lease.buffer_mut()) => chunk,
                _ = self.ctx.done() => return,
            };
            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    debug!(worker, "Source exhausted");
                    return;
                }
                Err(err) => return self.fail(err),
            };

            let body = lease.buffer().as_slice();
            let options = StageOptions {
                content_sha256: match self.validation {
                    TransferValidation::Sha256 => Some(hex::encode(Sha256::digest(body))),
                    TransferValidation::None => None,
                },
            };

            let staged = tokio::select! {
                result = self.writer.stage_block(&self.ctx, &chunk.block_id, body, &options) => result,
                _ = self.ctx.done() => return,
            };

            match staged {
                Ok(_) => {
                    debug!(worker, index = chunk.index, size = chunk.size, "Staged block");
                    self.committer.record(StagedBlock {
                        index: chunk.index,
                        block_id: chunk.block_id,
                        size: chunk.size,
                    });
                    self.report_progress(chunk.size);
                }
                Err(err) if err.is_cancellation() && self.ctx.is_done() => return,
                Err(err) => {
                    return self.fail(UploadError::stage(chunk.block_id.to_string(), err));
                }
            }
        }
    }
}
