//! Buffer pools ("transfer managers") bounding memory use during an upload.
//!
//! A worker acquires one buffer, fills it with the next chunk, stages it and
//! hands it back. When every buffer is out, `acquire` suspends; that wait is
//! the upload's backpressure.

mod dynamic_pool;
mod static_pool;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LARGE_BLOCK_THRESHOLD;
use crate::UploadResult;

pub use dynamic_pool::DynamicBufferPool;
pub use static_pool::StaticBufferPool;

/// Pluggable buffer allocation and reuse strategy
#[async_trait]
pub trait TransferManager: Send + Sync {
    /// Take a free buffer, waiting until one is available
    async fn acquire(&self) -> UploadResult<Buffer>;

    /// Return a buffer to the free set
    fn release(&self, buffer: Buffer);

    /// Capacity of every buffer handed out
    fn buffer_size(&self) -> usize;

    /// Upper bound on buffers out at once
    fn max_buffers(&self) -> usize;

    /// Short strategy name for logs
    fn kind(&self) -> &'static str;

    /// Free pooled buffers and fail pending and future acquires
    fn close(&self);
}

enum Storage {
    Heap(Vec<u8>),
    #[cfg(unix)]
    Mapped(memmap2::MmapMut),
}

/// Fixed-capacity byte buffer owned by exactly one holder at a time
pub struct Buffer {
    id: u64,
    storage: Storage,
    len: usize,
}

impl Buffer {
    /// Heap-allocated buffer
    pub fn heap(id: u64, capacity: usize) -> Self {
        Self {
            id,
            storage: Storage::Heap(vec![0u8; capacity]),
            len: 0,
        }
    }

    /// Buffer backed by an anonymous memory map
    #[cfg(unix)]
    pub fn mapped(id: u64, capacity: usize) -> std::io::Result<Self> {
        let map = memmap2::MmapMut::map_anon(capacity)?;
        Ok(Self {
            id,
            storage: Storage::Mapped(map),
            len: 0,
        })
    }

    /// Pool-assigned identity
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Heap(bytes) => bytes.len(),
            #[cfg(unix)]
            Storage::Mapped(map) => map.len(),
        }
    }

    /// Number of filled bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        match &self.storage {
            Storage::Heap(_) => false,
            #[cfg(unix)]
            Storage::Mapped(_) => true,
        }
    }

    /// Filled bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.raw()[..self.len]
    }

    /// Whole capacity, for filling
    pub fn as_mut_capacity(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Heap(bytes) => bytes.as_mut_slice(),
            #[cfg(unix)]
            Storage::Mapped(map) => &mut map[..],
        }
    }

    /// Mark the first `len` bytes as filled (clamped to capacity)
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn raw(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(bytes) => bytes.as_slice(),
            #[cfg(unix)]
            Storage::Mapped(map) => &map[..],
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// A buffer on loan from a pool; released back when dropped
pub struct BufferLease {
    buffer: Option<Buffer>,
    pool: Arc<dyn TransferManager>,
}

impl BufferLease {
    /// Acquire a buffer from `pool`
    pub async fn acquire(pool: Arc<dyn TransferManager>) -> UploadResult<Self> {
        let buffer = pool.acquire().await?;
        Ok(Self {
            buffer: Some(buffer),
            pool,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        // Only `drop` takes the buffer out.
        self.buffer.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

/// Pick the pool a session uses when the caller did not supply one
pub(crate) fn default_transfer_manager(
    concurrency: usize,
    block_size: usize,
) -> UploadResult<Arc<dyn TransferManager>> {
    if block_size >= LARGE_BLOCK_THRESHOLD {
        Ok(Arc::new(StaticBufferPool::new(concurrency, block_size)?))
    } else {
        Ok(Arc::new(DynamicBufferPool::new(concurrency, block_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_len_is_clamped() {
        let mut buffer = Buffer::heap(7, 16);
        buffer.as_mut_capacity()[..3].copy_from_slice(b"abc");
        buffer.set_len(3);
        assert_eq!(buffer.as_slice(), b"abc");

        buffer.set_len(100);
        assert_eq!(buffer.len(), 16);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.id(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_mapped_buffer() {
        let mut buffer = Buffer::mapped(1, 4096).unwrap();
        assert!(buffer.is_mapped());
        assert_eq!(buffer.capacity(), 4096);
        buffer.as_mut_capacity()[4095] = 9;
        buffer.set_len(4096);
        assert_eq!(buffer.as_slice()[4095], 9);
    }

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let pool: Arc<dyn TransferManager> = Arc::new(DynamicBufferPool::new(1, 64));
        {
            let lease = BufferLease::acquire(pool.clone()).await.unwrap();
            assert_eq!(lease.buffer().capacity(), 64);
        }
        // The single slot is free again.
        let again = tokio::time::timeout(std::time::Duration::from_secs(1), pool.acquire()).await;
        assert!(again.is_ok());
    }

    #[test]
    fn test_default_selection() {
        let small = default_transfer_manager(2, 1024).unwrap();
        assert_eq!(small.kind(), "dynamic");

        let large = default_transfer_manager(1, LARGE_BLOCK_THRESHOLD).unwrap();
        assert_eq!(large.kind(), "static");
        assert_eq!(large.max_buffers(), 1);
    }
}
