//! Chain types delivered by the consensus collaborator.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};

/// Block timestamp, seconds since the Unix epoch.
pub type Timestamp = u64;

/// Per-namespace counter assigning a storage key to each extracted record.
pub type DataId = u64;

// ─── Ids ──────────────────────────────────────────────────────────────────────

/// Block identifier (block hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockId(pub [u8; 32]);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// Identifier of a consensus change, used as the resumption cursor when
/// (re)subscribing to the consensus set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct ConsensusChangeId(pub [u8; 32]);

impl ConsensusChangeId {
    /// The zero id: subscribe from genesis.
    pub const BEGINNING: Self = Self([0u8; 32]);

    pub fn is_beginning(&self) -> bool {
        *self == Self::BEGINNING
    }
}

impl fmt::Display for ConsensusChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ConsensusChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsensusChangeId({self})")
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// A transaction, reduced to the part the replicator reads: its
/// free-form arbitrary data blobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub arbitrary_data: Vec<Vec<u8>>,
}

impl Transaction {
    pub fn with_data(arbitrary_data: Vec<Vec<u8>>) -> Self {
        Self { arbitrary_data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub id: BlockId,
    pub timestamp: Timestamp,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(id: BlockId, timestamp: Timestamp, transactions: Vec<Transaction>) -> Self {
        Self {
            id,
            timestamp,
            transactions,
        }
    }
}

// ─── ConsensusChange ──────────────────────────────────────────────────────────

/// A batch of chain updates.
///
/// `reverted_blocks` are ordered from the highest block down,
/// `applied_blocks` from the lowest block up. A change always applies at
/// least one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusChange {
    pub id: ConsensusChangeId,
    pub reverted_blocks: Vec<Block>,
    pub applied_blocks: Vec<Block>,
}

impl ConsensusChange {
    /// A change that only applies blocks.
    pub fn apply(id: ConsensusChangeId, applied_blocks: Vec<Block>) -> Self {
        Self {
            id,
            reverted_blocks: vec![],
            applied_blocks,
        }
    }

    /// Returns `true` if the change rolls back at least one block.
    pub fn is_reorg(&self) -> bool {
        !self.reverted_blocks.is_empty()
    }
}
