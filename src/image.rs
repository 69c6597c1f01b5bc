//! In-memory copy of a partition

use crate::bitmap::AllocationBitmap;
use crate::device::FlashDevice;
use crate::error::{FlashError, Result};
use crate::layout::{bitmap_offset, data_slot_limit, PartitionHeader, PartitionId, BLOCK_SIZE};
use tracing::{debug, warn};

/// Raw bytes of one partition, read fresh from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionImage {
    partition: PartitionId,
    offset: u32,
    bytes: Vec<u8>,
}

impl PartitionImage {
    /// Read a whole partition into an owned buffer
    ///
    /// Nothing is validated here; consumers check the magic when they need it.
    pub fn load<D: FlashDevice + ?Sized>(device: &D, partition: PartitionId) -> Result<Self> {
        let info = device.info(partition).map_err(|e| {
            warn!("Error finding partition {}: {}", partition, e);
            FlashError::NotFound
        })?;
        let len = info.len as usize;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| FlashError::AllocationFailure(len))?;
        bytes.resize(len, 0);

        device.read(info.offset, &mut bytes)?;

        debug!(
            "Read partition {}: offset {:#x}, length {}",
            partition, info.offset, len
        );

        Ok(PartitionImage {
            partition,
            offset: info.offset,
            bytes,
        })
    }

    /// Wrap bytes that were obtained elsewhere (e.g. a host-side dump)
    pub fn from_bytes(partition: PartitionId, offset: u32, bytes: Vec<u8>) -> Self {
        PartitionImage {
            partition,
            offset,
            bytes,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap().is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Parse and validate the header block
    pub fn header(&self) -> Result<PartitionHeader> {
        PartitionHeader::from_bytes(&self.bytes)
    }

    pub fn bitmap(&self) -> AllocationBitmap<'_> {
        AllocationBitmap::new(&self.bytes[bitmap_offset(self.len())..])
    }

    /// Block by partition block index (0 = header)
    pub fn block(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(BLOCK_SIZE)?;
        self.bytes.get(start..start + BLOCK_SIZE)
    }

    /// Data block by slot (slot 0 = partition block 1)
    pub fn data_block(&self, slot: usize) -> Option<&[u8]> {
        self.block(slot + 1)
    }

    /// Occupied data blocks, in slot order
    pub fn live_blocks(&self) -> impl Iterator<Item = (usize, &[u8])> {
        live_blocks(&self.bytes)
    }
}

/// Walk the occupied prefix of a raw partition image.
///
/// Stops at the first free bitmap bit or at the last data slot before the
/// bitmap. `image` must satisfy [`crate::layout::check_partition_len`].
pub fn live_blocks(image: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    let bitmap = AllocationBitmap::new(&image[bitmap_offset(image.len())..]);
    (0..data_slot_limit(image.len()))
        .take_while(move |&slot| !bitmap.is_free(slot))
        .map(move |slot| {
            let start = (slot + 1) * BLOCK_SIZE;
            (slot, &image[start..start + BLOCK_SIZE])
        })
}
