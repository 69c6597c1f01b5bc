//! Block removal with compaction
//!
//! Drops every live data block whose block-type identifier is in a
//! [`RemovalRequest`], shifts the survivors down so the occupied slots stay a
//! contiguous prefix, and rebuilds the allocation bitmap to match.
//!
//! The pass is a single linear scan over the live prefix. The input image is
//! never modified; the result is a new buffer of the same length.

use crate::bitmap::{AllocationBitmap, AllocationBitmapMut};
use crate::error::{FlashError, Result};
use crate::layout::{
    bitmap_offset, block_type, check_partition_len, data_slot_limit, BLOCK_SIZE, MAGIC,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// How stored block-type identifiers are compared with a removal request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdMatching {
    /// Compare the full 16-bit identifier
    #[default]
    Full,

    /// Compare only the low byte of the stored identifier against the
    /// requested identifier. Older tools matched this way; an identifier with
    /// a non-zero high byte can then never match.
    LowByte,
}

impl IdMatching {
    pub fn matches(self, stored: u16, requested: u16) -> bool {
        match self {
            IdMatching::Full => stored == requested,
            IdMatching::LowByte => (stored & 0x00FF) == requested,
        }
    }
}

/// Block-type identifiers to purge from a partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalRequest {
    ids: BTreeSet<u16>,
}

impl RemovalRequest {
    pub fn new<I: IntoIterator<Item = u16>>(ids: I) -> Self {
        RemovalRequest {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn single(id: u16) -> Self {
        Self::new([id])
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ids.iter().copied()
    }

    /// Requested identifier that `stored` matches, if any
    pub fn find_match(&self, stored: u16, matching: IdMatching) -> Option<u16> {
        self.iter().find(|&id| matching.matches(stored, id))
    }
}

impl FromIterator<u16> for RemovalRequest {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A compacted partition image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    /// Full-length image: header, survivors, 0xFF fill, rebuilt bitmap
    pub image: Vec<u8>,

    /// Blocks that must be written from the start of the partition,
    /// header included
    pub blocks_to_persist: usize,

    /// Number of data blocks dropped
    pub removed: usize,

    /// Source slots of the dropped blocks
    pub removed_slots: Vec<usize>,
}

impl Compaction {
    /// Bytes of live data (header plus survivors) to write back
    pub fn live_len(&self) -> usize {
        self.blocks_to_persist * BLOCK_SIZE
    }

    /// Surviving data blocks
    pub fn survivors(&self) -> usize {
        self.blocks_to_persist - 1
    }
}

/// Result of a compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactOutcome {
    /// The partition holds no data blocks; nothing was done
    Empty,

    Compacted(Compaction),
}

impl CompactOutcome {
    /// Number of removed blocks (zero for an empty partition)
    pub fn removed(&self) -> usize {
        match self {
            CompactOutcome::Empty => 0,
            CompactOutcome::Compacted(c) => c.removed,
        }
    }
}

/// Removes blocks from partition images
#[derive(Debug, Clone, Copy, Default)]
pub struct Compactor {
    matching: IdMatching,
}

impl Compactor {
    pub fn new(matching: IdMatching) -> Self {
        Compactor { matching }
    }

    pub fn matching(&self) -> IdMatching {
        self.matching
    }

    /// Remove every live block matching `request` from `image`
    ///
    /// # Errors
    ///
    /// - `InvalidLength` if the image is not a whole number of blocks with
    ///   room for header and bitmap
    /// - `CorruptImage` if the header magic is wrong
    pub fn compact(&self, image: &[u8], request: &RemovalRequest) -> Result<CompactOutcome> {
        let len = image.len();
        check_partition_len(len)?;

        if image[..MAGIC.len()] != MAGIC {
            return Err(FlashError::CorruptImage);
        }

        let bitmap_start = bitmap_offset(len);
        let source_bitmap = AllocationBitmap::new(&image[bitmap_start..]);

        if source_bitmap.is_empty() {
            info!("Partition is empty, nothing to do");
            return Ok(CompactOutcome::Empty);
        }

        let mut output = vec![0xFF; len];
        output[..BLOCK_SIZE].copy_from_slice(&image[..BLOCK_SIZE]);

        let (data, bitmap_bytes) = output.split_at_mut(bitmap_start);
        let mut output_bitmap = AllocationBitmapMut::new(bitmap_bytes);

        let mut written = 0usize;
        let mut removed_slots = Vec::new();

        for slot in 0..data_slot_limit(len) {
            if source_bitmap.is_free(slot) {
                break;
            }

            let start = (slot + 1) * BLOCK_SIZE;
            let block = &image[start..start + BLOCK_SIZE];
            let stored = block_type(block);

            if let Some(id) = request.find_match(stored, self.matching) {
                removed_slots.push(slot);
                debug!(
                    "Removing block {} ({} so far): blknum {:#06x}",
                    slot,
                    removed_slots.len(),
                    id
                );
                continue;
            }

            let dest = (written + 1) * BLOCK_SIZE;
            data[dest..dest + BLOCK_SIZE].copy_from_slice(block);
            output_bitmap.mark_occupied(written);
            written += 1;
        }

        let removed = removed_slots.len();
        info!(
            "Compaction kept {} blocks, removed {}",
            written, removed
        );

        Ok(CompactOutcome::Compacted(Compaction {
            image: output,
            blocks_to_persist: written + 1,
            removed,
            removed_slots,
        }))
    }
}
