use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::copier::Copier;
use crate::writer::BlockWriter;
use crate::{ByteStream, UploadCtx, UploadOptions, UploadReceipt, UploadResult};

/// Block blob uploader - this is what services embed.
///
/// Owns the block writer and default options; every call runs an independent
/// session with its own buffer pool, error slot and cancellation scope.
#[derive(Clone)]
pub struct BlockBlobUploader {
    writer: Arc<dyn BlockWriter>,
    defaults: UploadOptions,
}

impl BlockBlobUploader {
    /// Create an uploader over `writer` with default options
    pub fn new<W: BlockWriter + 'static>(writer: W) -> Self {
        Self::from_shared(Arc::new(writer))
    }

    /// Create an uploader over a shared writer
    pub fn from_shared(writer: Arc<dyn BlockWriter>) -> Self {
        Self {
            writer,
            defaults: UploadOptions::default(),
        }
    }

    /// Options used by [`BlockBlobUploader::upload`]
    pub fn with_defaults(mut self, options: UploadOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn defaults(&self) -> &UploadOptions {
        &self.defaults
    }

    pub fn writer(&self) -> &Arc<dyn BlockWriter> {
        &self.writer
    }

    /// Prepare a session without running it
    pub fn session<R>(&self, ctx: &UploadCtx, reader: R, options: UploadOptions) -> UploadResult<Copier<R>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Copier::new(ctx, reader, self.writer.clone(), options)
    }

    /// Upload everything `reader` yields as one committed blob
    pub async fn upload_stream<R>(
        &self,
        ctx: &UploadCtx,
        reader: R,
        options: UploadOptions,
    ) -> UploadResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.session(ctx, reader, options)?.run().await
    }

    /// Upload with the uploader's default options
    pub async fn upload<R>(&self, ctx: &UploadCtx, reader: R) -> UploadResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.upload_stream(ctx, reader, self.defaults.clone()).await
    }

    /// Upload a stream of byte chunks
    pub async fn upload_byte_stream(
        &self,
        ctx: &UploadCtx,
        body: ByteStream,
        options: UploadOptions,
    ) -> UploadResult<UploadReceipt> {
        self.upload_stream(ctx, StreamReader::new(body), options).await
    }

    /// Upload an in-memory buffer; its length becomes the size hint
    pub async fn upload_bytes(
        &self,
        ctx: &UploadCtx,
        data: Bytes,
        options: UploadOptions,
    ) -> UploadResult<UploadReceipt> {
        let options = options.with_size_hint(data.len() as u64);
        self.upload_stream(ctx, Cursor::new(data), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlockStore;
    use crate::UploadError;

    #[tokio::test]
    async fn test_upload_bytes() {
        let store = MemoryBlockStore::new();
        let uploader = BlockBlobUploader::new(store.clone());

        let receipt = uploader
            .upload_bytes(&UploadCtx::new(), Bytes::from_static(b"hello world"), UploadOptions::new().with_block_size(4))
            .await
            .unwrap();

        assert_eq!(receipt.block_count, 3);
        assert_eq!(store.read_blob().unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_upload_byte_stream() {
        let store = MemoryBlockStore::new();
        let uploader = BlockBlobUploader::new(store.clone());
        let parts = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defgh")),
            Ok(Bytes::from_static(b"i")),
        ];
        let body: ByteStream = Box::pin(futures::stream::iter(parts));

        let receipt = uploader
            .upload_byte_stream(&UploadCtx::new(), body, UploadOptions::new().with_block_size(4))
            .await
            .unwrap();

        assert_eq!(receipt.size_bytes, 9);
        assert_eq!(store.read_blob().unwrap(), Bytes::from_static(b"abcdefghi"));
    }

    #[tokio::test]
    async fn test_size_hint_rejects_before_io() {
        let store = MemoryBlockStore::new();
        let uploader = BlockBlobUploader::new(store.clone());
        let data = Bytes::from(vec![0u8; crate::MAX_BLOCKS as usize + 1]);

        let err = uploader
            .upload_bytes(&UploadCtx::new(), data, UploadOptions::new().with_block_size(1))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Invalid { .. }));
        assert_eq!(store.stage_calls(), 0);
    }

    #[tokio::test]
    async fn test_defaults_are_used() {
        let store = MemoryBlockStore::new();
        let uploader = BlockBlobUploader::new(store.clone())
            .with_defaults(UploadOptions::new().with_block_size(2).with_concurrency(1));

        let receipt = uploader.upload(&UploadCtx::new(), Cursor::new(b"abcde".to_vec())).await.unwrap();
        assert_eq!(receipt.block_size, 2);
        assert_eq!(receipt.concurrency, 1);
        assert_eq!(store.peak_concurrent_stages(), 1);
    }
}
