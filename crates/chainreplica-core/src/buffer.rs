//! Block buffer: a fixed-size ring of recently applied blocks.
//!
//! The capacity equals the chain's maturity delay, so the buffer holds
//! exactly the blocks that could still be reverted. A block leaves the buffer
//! either by being evicted by a newer push (it is now mature) or by being
//! popped when the chain tip is reverted.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{Block, BlockId, ConsensusChangeId, DataId};

/// One buffered block.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockFrame {
    pub block: Block,
    /// Consensus change in which the block was received.
    pub change_id: ConsensusChangeId,
    /// Counter value assigned to the block's first record.
    pub data_id: DataId,
}

impl BlockFrame {
    pub fn new(block: Block, change_id: ConsensusChangeId, data_id: DataId) -> Self {
        Self {
            block,
            change_id,
            data_id,
        }
    }
}

/// Ring buffer of [`BlockFrame`]s.
///
/// Pushes are FIFO once the buffer is full (the oldest frame is evicted),
/// pops are LIFO (always the newest frame).
#[derive(Debug)]
pub struct BlockBuffer {
    slots: Vec<Option<BlockFrame>>,
    /// Slot of the newest frame; `None` until the first push.
    head: Option<usize>,
    count: usize,
}

impl BlockBuffer {
    /// Create a buffer with `size` slots.
    ///
    /// # Panics
    /// If `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "trying to create an invalid sized block buffer");
        Self {
            slots: (0..size).map(|_| None).collect(),
            head: None,
            count: 0,
        }
    }

    /// Push a frame. If the buffer is full the oldest frame is evicted and
    /// returned.
    ///
    /// # Panics
    /// If the buffer reports full but the slot being overwritten is empty.
    pub fn push(&mut self, frame: BlockFrame) -> Option<BlockFrame> {
        let size = self.capacity();
        let head = self.head.map_or(0, |h| (h + 1) % size);
        self.head = Some(head);

        let evicted = if self.count == size {
            let oldest = self.slots[head].take();
            if oldest.is_none() {
                panic!("block buffer should be full but found an empty slot at {head}");
            }
            oldest
        } else {
            self.count += 1;
            None
        };
        self.slots[head] = Some(frame);
        evicted
    }

    /// Pop the newest frame, which must hold the block `expected`.
    ///
    /// Returns `None` if the buffer is empty.
    ///
    /// # Panics
    /// If the newest frame holds a different block. Reverts always target
    /// the chain tip, so a mismatch means the delivery order was violated.
    pub fn pop(&mut self, expected: &BlockId) -> Option<BlockFrame> {
        if self.count == 0 {
            return None;
        }
        let size = self.capacity();
        let head = self.head?;
        let frame = match self.slots[head].take() {
            Some(frame) if frame.block.id == *expected => frame,
            Some(frame) => panic!(
                "trying to pop block {expected} from a block buffer whose head is {}",
                frame.block.id
            ),
            None => panic!("block buffer holds {} frames but its head is empty", self.count),
        };
        self.head = Some((head + size - 1) % size);
        self.count -= 1;
        Some(frame)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Buffered frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &BlockFrame> + '_ {
        let size = self.capacity();
        let newest = self.head.unwrap_or(0);
        let oldest = (newest + size + 1 - self.count) % size;
        (0..self.count).filter_map(move |i| self.slots[(oldest + i) % size].as_ref())
    }
}
