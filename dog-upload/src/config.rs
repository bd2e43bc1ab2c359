use std::collections::BTreeMap;
use std::sync::Arc;

use crate::transfer::TransferManager;
use crate::{UploadError, UploadResult};

/// Default number of concurrent stage workers
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Largest number of concurrent stage workers
pub const MAX_CONCURRENCY: usize = u16::MAX as usize;

/// Default block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Largest block a single stage call may carry (4000 MiB)
pub const MAX_STAGE_BLOCK_BYTES: u64 = 4000 * 1024 * 1024;

/// Largest number of blocks a committed blob may reference
pub const MAX_BLOCKS: u32 = 50_000;

/// Block sizes at or above this use the memory-mapped static pool by default
pub const LARGE_BLOCK_THRESHOLD: usize = 8 * 1024 * 1024;

/// Per-block integrity check sent along with each stage call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferValidation {
    #[default]
    None,
    /// Hex-encoded SHA-256 of the block body
    Sha256,
}

impl std::str::FromStr for TransferValidation {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "sha256" => Ok(Self::Sha256),
            other => Err(UploadError::invalid(format!("Unknown transfer validation: {}", other))),
        }
    }
}

/// Properties applied to the blob when the block list is committed
#[derive(Debug, Clone, Default)]
pub struct CommitProperties {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

/// Called with the cumulative number of bytes staged so far
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Options for a single streamed upload
#[derive(Clone)]
pub struct UploadOptions {
    /// Number of concurrent stage workers (0 means default)
    pub concurrency: usize,

    /// Size of every block except possibly the last (0 means default)
    pub block_size: usize,

    /// Override for the buffer pool; a default is built per session when unset
    pub transfer_manager: Option<Arc<dyn TransferManager>>,

    /// Expected source length, used to reject oversized uploads before any I/O
    pub size_hint: Option<u64>,

    /// Per-block checksum sent with each stage call
    pub transactional_validation: TransferValidation,

    /// Compute a SHA-256 of the whole source and pass it to the commit
    pub compute_content_digest: bool,

    /// Blob properties applied at commit
    pub commit: CommitProperties,

    /// Progress callback, invoked after each staged block with a non-decreasing total
    pub progress: Option<ProgressFn>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            block_size: DEFAULT_BLOCK_SIZE,
            transfer_manager: None,
            size_hint: None,
            transactional_validation: TransferValidation::None,
            compute_content_digest: false,
            commit: CommitProperties::default(),
            progress: None,
        }
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("concurrency", &self.concurrency)
            .field("block_size", &self.block_size)
            .field("transfer_manager", &self.transfer_manager.as_ref().map(|tm| tm.kind()))
            .field("size_hint", &self.size_hint)
            .field("transactional_validation", &self.transactional_validation)
            .field("compute_content_digest", &self.compute_content_digest)
            .field("commit", &self.commit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl UploadOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from environment variables.
    ///
    /// With prefix `DOG_UPLOAD__` this reads `DOG_UPLOAD__CONCURRENCY`,
    /// `DOG_UPLOAD__BLOCK_SIZE` and `DOG_UPLOAD__VALIDATION`. Missing keys keep
    /// their defaults; unparsable values are rejected.
    pub fn from_env(prefix: &str) -> UploadResult<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> UploadResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(value) = lookup(&format!("{}CONCURRENCY", prefix)) {
            options.concurrency = value.trim().parse().map_err(|_| {
                UploadError::invalid(format!("{}CONCURRENCY is not a number: {}", prefix, value))
            })?;
        }
        if let Some(value) = lookup(&format!("{}BLOCK_SIZE", prefix)) {
            options.block_size = value.trim().parse().map_err(|_| {
                UploadError::invalid(format!("{}BLOCK_SIZE is not a number: {}", prefix, value))
            })?;
        }
        if let Some(value) = lookup(&format!("{}VALIDATION", prefix)) {
            options.transactional_validation = value.trim().parse()?;
        }

        Ok(options)
    }

    /// Set concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set block size
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Use a specific buffer pool
    pub fn with_transfer_manager<T: TransferManager + 'static>(mut self, manager: T) -> Self {
        self.transfer_manager = Some(Arc::new(manager));
        self
    }

    /// Use a shared buffer pool
    pub fn with_shared_transfer_manager(mut self, manager: Arc<dyn TransferManager>) -> Self {
        self.transfer_manager = Some(manager);
        self
    }

    /// Set expected source length
    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    /// Enable per-block checksums
    pub fn with_transactional_validation(mut self, validation: TransferValidation) -> Self {
        self.transactional_validation = validation;
        self
    }

    /// Compute a whole-content SHA-256 for the commit
    pub fn with_content_digest(mut self) -> Self {
        self.compute_content_digest = true;
        self
    }

    /// Set content type applied at commit
    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.commit.content_type = Some(content_type.into());
        self
    }

    /// Add a metadata entry applied at commit
    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.commit.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a tag applied at commit
    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.commit.tags.insert(key.into(), value.into());
        self
    }

    /// Report staged bytes as the upload advances
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Replace unset values with defaults and check limits.
    pub fn validate(mut self) -> UploadResult<Self> {
        if self.concurrency == 0 {
            self.concurrency = DEFAULT_CONCURRENCY;
        }
        if self.block_size == 0 {
            self.block_size = DEFAULT_BLOCK_SIZE;
        }

        if self.concurrency > MAX_CONCURRENCY {
            return Err(UploadError::invalid(format!(
                "Concurrency {} exceeds maximum {}",
                self.concurrency, MAX_CONCURRENCY
            )));
        }

        if self.block_size as u64 > MAX_STAGE_BLOCK_BYTES {
            return Err(UploadError::invalid(format!(
                "Block size {} exceeds maximum {}",
                self.block_size, MAX_STAGE_BLOCK_BYTES
            )));
        }

        if let Some(size) = self.size_hint {
            let blocks = size.div_ceil(self.block_size as u64);
            if blocks > MAX_BLOCKS as u64 {
                return Err(UploadError::invalid(format!(
                    "Source of {} bytes needs {} blocks of {} bytes (max {})",
                    size, blocks, self.block_size, MAX_BLOCKS
                )));
            }
        }

        if let Some(manager) = &self.transfer_manager {
            if manager.buffer_size() != self.block_size {
                return Err(UploadError::invalid(format!(
                    "Transfer manager buffers are {} bytes but block size is {}",
                    manager.buffer_size(),
                    self.block_size
                )));
            }
        }

        Ok(self)
    }
}
