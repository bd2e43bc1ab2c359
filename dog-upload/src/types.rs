use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const PREFIX_LEN: usize = 16;
const RAW_ID_LEN: usize = PREFIX_LEN + 4;

/// Base64 block identifier.
///
/// Every ID in a session encodes the same 16-byte prefix followed by the
/// big-endian chunk index, so all IDs share one length and sort back into
/// content order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    /// Wrap an ID produced elsewhere
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Chunk index encoded in this ID, if it was produced by a [`BlockIdGenerator`]
    pub fn index(&self) -> Option<u32> {
        let raw = STANDARD.decode(&self.0).ok()?;
        if raw.len() != RAW_ID_LEN {
            return None;
        }
        let mut index = [0u8; 4];
        index.copy_from_slice(&raw[PREFIX_LEN..]);
        Some(u32::from_be_bytes(index))
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives block IDs from chunk indices for one session
#[derive(Debug, Clone)]
pub struct BlockIdGenerator {
    prefix: [u8; PREFIX_LEN],
}

impl BlockIdGenerator {
    /// Generator with a random session prefix
    pub fn new() -> Self {
        Self {
            prefix: *Uuid::new_v4().as_bytes(),
        }
    }

    /// Generator with a fixed prefix
    pub fn with_prefix(prefix: Uuid) -> Self {
        Self {
            prefix: *prefix.as_bytes(),
        }
    }

    /// Block ID for the chunk at `index`
    pub fn block_id(&self, index: u32) -> BlockId {
        let mut raw = [0u8; RAW_ID_LEN];
        raw[..PREFIX_LEN].copy_from_slice(&self.prefix);
        raw[PREFIX_LEN..].copy_from_slice(&index.to_be_bytes());
        BlockId(STANDARD.encode(raw))
    }
}

impl Default for BlockIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Staging,
    Committing,
    Committed,
    Failed,
    Canceled,
}

impl SessionState {
    /// Whether the session has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::Canceled)
    }
}

/// A block confirmed staged by the writer
#[derive(Debug, Clone)]
pub struct StagedBlock {
    pub index: u32,
    pub block_id: BlockId,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ids_are_fixed_width_and_unique() {
        let ids = BlockIdGenerator::new();
        let first = ids.block_id(0);
        let last = ids.block_id(u32::MAX);

        assert_eq!(first.as_str().len(), last.as_str().len());
        assert_ne!(first, ids.block_id(1));
        assert_eq!(last.index(), Some(u32::MAX));
    }

    #[test]
    fn test_block_ids_are_deterministic_per_prefix() {
        let prefix = Uuid::new_v4();
        let a = BlockIdGenerator::with_prefix(prefix);
        let b = BlockIdGenerator::with_prefix(prefix);
        assert_eq!(a.block_id(42), b.block_id(42));
        assert_ne!(a.block_id(42), BlockIdGenerator::new().block_id(42));
    }

    #[test]
    fn test_foreign_block_id_has_no_index() {
        let id = BlockId::from_string(STANDARD.encode(format!("{:6}", 0)));
        assert_eq!(id.index(), None);
        assert_eq!(BlockId::from_string("not base64!".into()).index(), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Staging.is_terminal());
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Canceled.is_terminal());
    }
}
