use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{Buffer, TransferManager};
use crate::{UploadError, UploadResult};

/// Heap buffers allocated on demand up to a cap and recycled through a free list
pub struct DynamicBufferPool {
    state: Mutex<PoolState>,
    slots: Semaphore,
    buffer_size: usize,
    max_buffers: usize,
}

struct PoolState {
    free: Vec<Buffer>,
    allocated: usize,
    next_id: u64,
}

impl DynamicBufferPool {
    /// Pool handing out at most `max_buffers` buffers of `buffer_size` bytes
    pub fn new(max_buffers: usize, buffer_size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: Vec::with_capacity(max_buffers),
                allocated: 0,
                next_id: 0,
            }),
            slots: Semaphore::new(max_buffers),
            buffer_size,
            max_buffers,
        }
    }

    /// Buffers allocated so far
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    /// Allocated buffers currently free
    pub fn available(&self) -> usize {
        self.state.lock().free.len()
    }
}

#[async_trait]
impl TransferManager for DynamicBufferPool {
    async fn acquire(&self) -> UploadResult<Buffer> {
        let permit = self.slots.acquire().await.map_err(|_| UploadError::PoolClosed)?;
        permit.forget();

        let mut state = self.state.lock();
        if let Some(buffer) = state.free.pop() {
            return Ok(buffer);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.allocated += 1;
        drop(state);

        Ok(Buffer::heap(id, self.buffer_size))
    }

    fn release(&self, mut buffer: Buffer) {
        if buffer.capacity() != self.buffer_size {
            return;
        }

        let mut state = self.state.lock();
        if buffer.id() >= state.next_id || state.free.len() >= state.allocated {
            return;
        }
        if self.slots.is_closed() {
            state.allocated -= 1;
            return;
        }

        buffer.clear();
        state.free.push(buffer);
        drop(state);
        self.slots.add_permits(1);
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    fn kind(&self) -> &'static str {
        "dynamic"
    }

    fn close(&self) {
        self.slots.close();
        let mut state = self.state.lock();
        state.allocated -= state.free.len();
        state.free.clear();
    }
}
