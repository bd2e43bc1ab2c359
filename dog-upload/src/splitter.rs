use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use crate::config::MAX_BLOCKS;
use crate::transfer::Buffer;
use crate::{BlockId, BlockIdGenerator, UploadError, UploadResult};

/// A chunk read into a leased buffer
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u32,
    pub block_id: BlockId,
    pub size: usize,
}

/// Cuts a single source stream into consecutive fixed-size chunks.
///
/// Many workers call [`ChunkSplitter::next_chunk`] at once, but the reader sits
/// behind an async mutex so reads happen one at a time and indices follow
/// source order.
pub struct ChunkSplitter<R> {
    state: Mutex<SplitterState<R>>,
    block_size: usize,
    max_blocks: u32,
    ids: BlockIdGenerator,
}

struct SplitterState<R> {
    reader: R,
    next_index: u32,
    bytes_read: u64,
    eof: bool,
    failed: bool,
    hasher: Option<Sha256>,
}

impl<R> ChunkSplitter<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, block_size: usize, ids: BlockIdGenerator) -> Self {
        Self {
            state: Mutex::new(SplitterState {
                reader,
                next_index: 0,
                bytes_read: 0,
                eof: false,
                failed: false,
                hasher: None,
            }),
            block_size,
            max_blocks: MAX_BLOCKS,
            ids,
        }
    }

    /// Keep a running SHA-256 of everything read
    pub fn with_digest(mut self) -> Self {
        self.state.get_mut().hasher = Some(Sha256::new());
        self
    }

    #[cfg(test)]
    pub(crate) fn with_max_blocks(mut self, max_blocks: u32) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Fill `buffer` with the next chunk.
    ///
    /// Returns `Ok(None)` once the source is exhausted. After an error no
    /// further reads are attempted and every later call returns `Ok(None)`.
    pub async fn next_chunk(&self, buffer: &mut Buffer) -> UploadResult<Option<Chunk>> {
        let mut state = self.state.lock().await;
        if state.eof || state.failed {
            return Ok(None);
        }

        buffer.clear();
        let window = self.block_size.min(buffer.capacity());
        let target = &mut buffer.as_mut_capacity()[..window];

        let mut filled = 0;
        while filled < window {
            let read = state.reader.read(&mut target[filled..]).await;
            match read {
                Ok(0) => {
                    state.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    state.failed = true;
                    return Err(e.into());
                }
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        if state.next_index >= self.max_blocks {
            state.failed = true;
            return Err(UploadError::TooManyBlocks { max: self.max_blocks });
        }

        if let Some(hasher) = state.hasher.as_mut() {
            hasher.update(&target[..filled]);
        }
        buffer.set_len(filled);

        let index = state.next_index;
        state.next_index += 1;
        state.bytes_read += filled as u64;

        Ok(Some(Chunk {
            index,
            block_id: self.ids.block_id(index),
            size: filled,
        }))
    }

    /// Chunks handed out so far
    pub async fn chunks_read(&self) -> u32 {
        self.state.lock().await.next_index
    }

    pub async fn bytes_read(&self) -> u64 {
        self.state.lock().await.bytes_read
    }

    /// Hex SHA-256 of all bytes read, if digesting was enabled
    pub async fn finish_digest(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.hasher.take().map(|h| hex::encode(h.finalize()))
    }
}
