use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{Buffer, TransferManager};
use crate::{UploadError, UploadResult};

/// Fixed set of buffers allocated once at construction.
///
/// On unix the buffers are anonymous memory maps, which keeps large blocks
/// out of the allocator and returns the pages to the OS on drop.
pub struct StaticBufferPool {
    free: Mutex<Vec<Buffer>>,
    available: Semaphore,
    buffer_size: usize,
    count: usize,
}

impl StaticBufferPool {
    /// Allocate `count` buffers of `buffer_size` bytes (memory-mapped on unix)
    pub fn new(count: usize, buffer_size: usize) -> UploadResult<Self> {
        #[cfg(unix)]
        {
            let buffers = (0..count)
                .map(|id| Buffer::mapped(id as u64, buffer_size))
                .collect::<std::io::Result<Vec<_>>>()
                .map_err(UploadError::backend)?;
            Ok(Self::from_buffers(buffers, buffer_size))
        }
        #[cfg(not(unix))]
        {
            Ok(Self::heap(count, buffer_size))
        }
    }

    /// Allocate `count` heap buffers of `buffer_size` bytes
    pub fn heap(count: usize, buffer_size: usize) -> Self {
        let buffers = (0..count)
            .map(|id| Buffer::heap(id as u64, buffer_size))
            .collect();
        Self::from_buffers(buffers, buffer_size)
    }

    fn from_buffers(buffers: Vec<Buffer>, buffer_size: usize) -> Self {
        let count = buffers.len();
        debug!(count, buffer_size, "Allocated static buffer pool");
        Self {
            free: Mutex::new(buffers),
            available: Semaphore::new(count),
            buffer_size,
            count,
        }
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[async_trait]
impl TransferManager for StaticBufferPool {
    async fn acquire(&self) -> UploadResult<Buffer> {
        let permit = self.available.acquire().await.map_err(|_| UploadError::PoolClosed)?;
        permit.forget();

        // A permit is only ever added alongside a pushed buffer.
        self.free
            .lock()
            .pop()
            .ok_or_else(|| UploadError::Internal("static pool permit without a buffer".to_string()))
    }

    fn release(&self, mut buffer: Buffer) {
        if self.available.is_closed() || buffer.capacity() != self.buffer_size {
            return;
        }

        buffer.clear();
        let mut free = self.free.lock();
        if free.len() >= self.count {
            return;
        }
        free.push(buffer);
        drop(free);
        self.available.add_permits(1);
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn max_buffers(&self) -> usize {
        self.count
    }

    fn kind(&self) -> &'static str {
        "static"
    }

    fn close(&self) {
        self.available.close();
        self.free.lock().clear();
    }
}
