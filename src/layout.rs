//! On-flash layout of a partition
//!
//! ```text
//! ┌──────────────────────┐ offset
//! │ Block 0: header      │ magic (16) | partition id | 0x00 | 0xFF padding
//! ├──────────────────────┤
//! │ Block 1..M: data     │ [block id u16 LE][payload]
//! │ ...                  │
//! ├──────────────────────┤ offset + length - bitmap_len(length)
//! │ Allocation bitmap    │ 1 bit per data slot, MSB first, 1 = free
//! └──────────────────────┘ offset + length
//! ```

use crate::error::{FlashError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAGIC: [u8; 16] = *b"KATANA_FLASH____";
pub const BLOCK_SIZE: usize = 64;

/// Data slots tracked by one 64-byte bitmap block
pub const SLOTS_PER_BITMAP_BLOCK: usize = BLOCK_SIZE * 8;

/// Flashrom partitions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionId {
    /// Factory settings (read-only)
    System = 0,
    /// Reserved (read-only)
    Reserved = 1,
    /// First block-allocated bank
    Block1 = 2,
    /// Console settings
    Settings = 3,
    /// Second block-allocated bank
    Block2 = 4,
}

impl PartitionId {
    pub const ALL: [PartitionId; 5] = [
        PartitionId::System,
        PartitionId::Reserved,
        PartitionId::Block1,
        PartitionId::Settings,
        PartitionId::Block2,
    ];

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PartitionId::System),
            1 => Ok(PartitionId::Reserved),
            2 => Ok(PartitionId::Block1),
            3 => Ok(PartitionId::Settings),
            4 => Ok(PartitionId::Block2),
            _ => Err(FlashError::InvalidPartition(value)),
        }
    }

    /// Whether this partition may be erased or rewritten
    pub fn is_rewritable(self) -> bool {
        (PartitionId::Block1 as u8..=PartitionId::Block2 as u8).contains(&(self as u8))
    }

    /// Fail with `InvalidPartition` unless this partition may be erased or rewritten
    pub fn ensure_rewritable(self) -> Result<()> {
        if self.is_rewritable() {
            Ok(())
        } else {
            Err(FlashError::InvalidPartition(self as u8))
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PartitionId::System => "system",
            PartitionId::Reserved => "reserved",
            PartitionId::Block1 => "block1",
            PartitionId::Settings => "settings",
            PartitionId::Block2 => "block2",
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size in bytes of the allocation bitmap at the tail of a partition.
///
/// One bit per 64-byte block, rounded up to whole 512-slot bitmap blocks.
pub fn bitmap_len(partition_len: usize) -> usize {
    (((partition_len >> 6) + (SLOTS_PER_BITMAP_BLOCK - 1)) & !(SLOTS_PER_BITMAP_BLOCK - 1)) >> 3
}

/// Byte offset of the bitmap, relative to the start of the partition
pub fn bitmap_offset(partition_len: usize) -> usize {
    partition_len - bitmap_len(partition_len)
}

/// Number of data slots the compactor may inspect.
///
/// Excludes the header block and never reaches into the bitmap region.
pub fn data_slot_limit(partition_len: usize) -> usize {
    let blocks = partition_len / BLOCK_SIZE;
    let before_bitmap = bitmap_offset(partition_len) / BLOCK_SIZE;
    blocks.saturating_sub(2).min(before_bitmap.saturating_sub(1))
}

/// Check that a partition length can hold a header, one data slot and the bitmap
pub fn check_partition_len(partition_len: usize) -> Result<()> {
    if partition_len == 0
        || partition_len % BLOCK_SIZE != 0
        || partition_len < 2 * BLOCK_SIZE + bitmap_len(partition_len)
    {
        return Err(FlashError::InvalidLength(partition_len));
    }
    Ok(())
}

/// Block-type identifier stored in the first two bytes of a data block
pub fn block_type(block: &[u8]) -> u16 {
    u16::from_le_bytes([block[0], block[1]])
}

/// Partition header (block 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionHeader {
    pub magic: [u8; 16],

    /// Raw partition id byte
    pub partition: u8,

    /// Always zero on freshly formatted partitions
    pub reserved: u8,
}

impl PartitionHeader {
    pub fn new(partition: PartitionId) -> Self {
        PartitionHeader {
            magic: MAGIC,
            partition: partition as u8,
            reserved: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FlashError::CorruptImage);
        }
        Ok(())
    }

    /// Serialize to a full header block, padded with 0xFF
    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut block = [0xFF; BLOCK_SIZE];
        block[..16].copy_from_slice(&self.magic);
        block[16] = self.partition;
        block[17] = self.reserved;
        block
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 18 {
            return Err(FlashError::InvalidLength(bytes.len()));
        }

        let mut magic = [0u8; 16];
        magic.copy_from_slice(&bytes[..16]);

        let header = PartitionHeader {
            magic,
            partition: bytes[16],
            reserved: bytes[17],
        };
        header.validate()?;

        Ok(header)
    }
}
