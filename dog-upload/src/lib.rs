//! # dog-upload: Chunked concurrent block uploads
//!
//! `dog-upload` streams a source of unknown length into a block blob: the
//! source is cut into fixed-size blocks, a bounded set of workers stages them
//! in parallel, and a single commit makes the ordered block list visible.
//! Nothing is visible until every block is staged.
//!
//! ## Key Features
//!
//! - **Bounded memory**: at most `concurrency` buffers of `block_size` bytes are alive per upload
//! - **Pluggable buffer pools**: memory-mapped static pool or grow-on-demand dynamic pool
//! - **Atomic visibility**: the block list is committed once, only after an error-free join
//! - **First error wins**: the first failure cancels the remaining work and is what callers see
//! - **Storage agnostic**: any backend behind the [`BlockWriter`] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//! use dog_upload::MemoryBlockStore;
//! use std::io::Cursor;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = MemoryBlockStore::new();
//! let uploader = BlockBlobUploader::new(store.clone());
//!
//! let options = UploadOptions::new()
//!     .with_block_size(4 * 1024)
//!     .with_concurrency(4)
//!     .with_content_type("text/plain");
//!
//! let source = Cursor::new(vec![b'x'; 10_000]);
//! let receipt = uploader.upload_stream(&UploadCtx::new(), source, options).await?;
//!
//! assert_eq!(receipt.block_count, 3);
//! assert_eq!(store.read_blob().unwrap().len(), 10_000);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐
//! │ BlockBlobUploader │  ← one session per call
//! ├───────────────────┤
//! │      Copier       │  ← splitter, workers, error slot, committer
//! ├───────────────────┤
//! │ TransferManager   │  ← buffer pool (backpressure)
//! │ BlockWriter       │  ← stage / commit primitives
//! └───────────────────┘
//! ```

mod committer;
mod config;
mod copier;
mod ctx;
mod error;
mod error_slot;
pub mod memory;
#[cfg(feature = "tracing-basic")]
pub mod observability;
mod receipt;
mod splitter;
pub mod transfer;
mod types;
mod uploader;
pub mod writer;

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

// Re-export main types for clean API
pub use committer::Committer;
pub use config::{
    CommitProperties, ProgressFn, TransferValidation, UploadOptions, DEFAULT_BLOCK_SIZE,
    DEFAULT_CONCURRENCY, LARGE_BLOCK_THRESHOLD, MAX_BLOCKS, MAX_CONCURRENCY, MAX_STAGE_BLOCK_BYTES,
};
pub use copier::Copier;
pub use ctx::UploadCtx;
pub use error::{SharedError, UploadError, UploadResult};
pub use error_slot::ErrorSlot;
pub use memory::MemoryBlockStore;
pub use receipt::UploadReceipt;
pub use splitter::{Chunk, ChunkSplitter};
pub use transfer::{Buffer, BufferLease, DynamicBufferPool, StaticBufferPool, TransferManager};
pub use types::{BlockId, BlockIdGenerator, SessionState, StagedBlock, UploadId};
pub use uploader::BlockBlobUploader;
pub use writer::{BlockWriter, CommitOptions, CommitResponse, StageOptions, StageResponse};

/// Stream of byte chunks accepted by [`BlockBlobUploader::upload_byte_stream`]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlockBlobUploader, BlockWriter, ByteStream, TransferValidation, UploadCtx, UploadError,
        UploadOptions, UploadReceipt, UploadResult,
    };
}
