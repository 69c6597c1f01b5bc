//! Device adapter boundary
//!
//! [`FlashDevice`] is the only way the rest of the crate touches storage.
//! Two adapters are provided:
//! - [`MemoryFlash`]: flash contents held in a `Vec<u8>` (tests, scratch work)
//! - [`MappedFlash`]: a flashrom dump file mapped with `memmap2`
//!
//! Both follow NOR flash rules: `erase` sets a whole partition to `0xFF`, and
//! `write` can only clear bits (the stored byte becomes `old & new`).

use crate::image::live_blocks;
use crate::layout::{check_partition_len, PartitionHeader, PartitionId, BLOCK_SIZE};
use memmap2::MmapMut;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    #[error("Access out of bounds: {len} bytes at offset {offset:#x}")]
    OutOfBounds { offset: u32, len: usize },

    #[error("Block {block_id:#06x} not found in partition {partition}")]
    BlockNotFound { partition: PartitionId, block_id: u16 },

    #[error("Flash image is {actual} bytes, partition table needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of a partition on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub offset: u32,
    pub len: u32,
}

impl PartitionInfo {
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.offset && offset - self.offset < self.len
    }
}

/// Storage device holding the flashrom partitions
///
/// Every call runs to completion before returning. Reads borrow the device
/// shared; writes and erases need exclusive access.
pub trait FlashDevice {
    /// Look up where a partition lives
    fn info(&self, partition: PartitionId) -> Result<PartitionInfo, DeviceError>;

    /// Fill `buf` with bytes starting at an absolute offset
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Program bytes at an absolute offset
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// Erase the whole partition that contains `offset`
    fn erase(&mut self, offset: u32) -> Result<(), DeviceError>;

    /// Fetch the most recent live block carrying `block_id`
    fn read_block(
        &self,
        partition: PartitionId,
        block_id: u16,
    ) -> Result<[u8; BLOCK_SIZE], DeviceError>;
}

/// Partition id to location map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: BTreeMap<PartitionId, PartitionInfo>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dreamcast flashrom layout (128KB)
    pub fn dreamcast() -> Self {
        PartitionTable::new()
            .with(PartitionId::System, 0x1A000, 0x2000)
            .with(PartitionId::Reserved, 0x18000, 0x2000)
            .with(PartitionId::Block1, 0x1C000, 0x4000)
            .with(PartitionId::Settings, 0x10000, 0x8000)
            .with(PartitionId::Block2, 0x00000, 0x10000)
    }

    pub fn with(mut self, partition: PartitionId, offset: u32, len: u32) -> Self {
        self.entries.insert(partition, PartitionInfo { offset, len });
        self
    }

    pub fn get(&self, partition: PartitionId) -> Option<PartitionInfo> {
        self.entries.get(&partition).copied()
    }

    /// Partition that owns an absolute offset
    pub fn containing(&self, offset: u32) -> Option<(PartitionId, PartitionInfo)> {
        self.entries
            .iter()
            .find(|(_, info)| info.contains(offset))
            .map(|(id, info)| (*id, *info))
    }

    /// Bytes of storage needed to back every partition
    pub fn total_len(&self) -> usize {
        self.entries
            .values()
            .map(|info| info.offset as usize + info.len as usize)
            .max()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartitionId, PartitionInfo)> + '_ {
        self.entries.iter().map(|(id, info)| (*id, *info))
    }
}

/// Flash contents backed by any byte buffer
pub struct FlashArray<S> {
    storage: S,
    table: PartitionTable,
}

/// Flash held entirely in memory
pub type MemoryFlash = FlashArray<Vec<u8>>;

/// Flash dump file mapped into memory
pub type MappedFlash = FlashArray<MmapMut>;

impl FlashArray<Vec<u8>> {
    /// Fully erased flash
    pub fn blank(table: PartitionTable) -> Self {
        let storage = vec![0xFF; table.total_len()];
        FlashArray { storage, table }
    }

    /// Erased flash with a fresh header at the start of every partition
    pub fn formatted(table: PartitionTable) -> Self {
        let mut flash = Self::blank(table);
        let partitions: Vec<_> = flash.table.iter().collect();
        for (id, info) in partitions {
            let header = PartitionHeader::new(id).to_bytes();
            let start = info.offset as usize;
            // Partitions shorter than a block cannot hold a header
            if (info.len as usize) < BLOCK_SIZE {
                continue;
            }
            if let Some(block) = flash.storage.get_mut(start..start + BLOCK_SIZE) {
                block.copy_from_slice(&header);
            }
        }
        flash
    }

    pub fn from_bytes(bytes: Vec<u8>, table: PartitionTable) -> Result<Self, DeviceError> {
        check_backing_len(&table, bytes.len())?;
        Ok(FlashArray {
            storage: bytes,
            table,
        })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.storage
    }
}

impl FlashArray<MmapMut> {
    /// Map an existing flash dump file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P, table: PartitionTable) -> Result<Self, DeviceError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;
        check_backing_len(&table, len)?;

        // SAFETY: the file is opened read/write by this process only for the
        // lifetime of the mapping; concurrent external modification is not
        // supported.
        let storage = unsafe { MmapMut::map_mut(&file)? };

        debug!("Mapped flash dump {:?} ({} bytes)", path.as_ref(), len);
        Ok(FlashArray { storage, table })
    }

    /// Push pending writes back to the dump file
    pub fn flush(&self) -> Result<(), DeviceError> {
        self.storage.flush()?;
        Ok(())
    }
}

impl<S: Deref<Target = [u8]>> FlashArray<S> {
    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.storage.len() => Ok(start..end),
            _ => Err(DeviceError::OutOfBounds { offset, len }),
        }
    }

    fn partition_bytes(&self, partition: PartitionId) -> Result<&[u8], DeviceError> {
        let info = self.info_inner(partition)?;
        let range = self.range(info.offset, info.len as usize)?;
        Ok(&self.storage[range])
    }

    fn info_inner(&self, partition: PartitionId) -> Result<PartitionInfo, DeviceError> {
        self.table
            .get(partition)
            .ok_or(DeviceError::UnknownPartition(partition))
    }
}

impl<S: Deref<Target = [u8]> + DerefMut> FlashDevice for FlashArray<S> {
    fn info(&self, partition: PartitionId) -> Result<PartitionInfo, DeviceError> {
        self.info_inner(partition)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.storage[range]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        let range = self.range(offset, data.len())?;
        for (cell, &byte) in self.storage[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, offset: u32) -> Result<(), DeviceError> {
        let (partition, info) = self
            .table
            .containing(offset)
            .ok_or(DeviceError::OutOfBounds { offset, len: 0 })?;
        let range = self.range(info.offset, info.len as usize)?;

        debug!("Erasing partition {} ({} bytes at {:#x})", partition, info.len, info.offset);
        self.storage[range].fill(0xFF);
        Ok(())
    }

    fn read_block(
        &self,
        partition: PartitionId,
        block_id: u16,
    ) -> Result<[u8; BLOCK_SIZE], DeviceError> {
        let bytes = self.partition_bytes(partition)?;
        let not_found = DeviceError::BlockNotFound {
            partition,
            block_id,
        };

        if check_partition_len(bytes.len()).is_err() {
            return Err(not_found);
        }

        // Later copies of a block supersede earlier ones
        let latest = live_blocks(bytes)
            .filter(|(_, block)| crate::layout::block_type(block) == block_id)
            .last()
            .map(|(_, block)| block);

        let block = latest.ok_or(not_found)?;
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(block);
        Ok(out)
    }
}

fn check_backing_len(table: &PartitionTable, actual: usize) -> Result<(), DeviceError> {
    let expected = table.total_len();
    if actual < expected {
        return Err(DeviceError::SizeMismatch { expected, actual });
    }
    Ok(())
}
