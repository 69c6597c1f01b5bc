//! Commit a compacted image back to the device

use crate::device::FlashDevice;
use crate::error::{FlashError, Result};
use crate::layout::{bitmap_len, PartitionId, BLOCK_SIZE};
use tracing::{info, warn};

/// Replace a partition with the contents of `image`.
///
/// Writes the first `initial_len` bytes of `image` (header plus surviving
/// blocks) at the partition start, then the bitmap taken from the tail of the
/// same buffer at its fixed position at the end of the partition.
///
/// # Errors
///
/// Checked before the device is touched:
/// - `InvalidPartition` unless the partition is one of the block banks or settings
/// - `NotFound` if the device cannot locate the partition
/// - `LengthMismatch` if `image` is not exactly the partition length
/// - `InvalidRange` if `initial_len` exceeds the partition or is not whole blocks
///
/// # Data loss
///
/// The sequence is erase, write data, write bitmap, with no rollback. A device
/// error or power loss after the erase leaves the partition erased or half
/// written, and everything that was in it is gone. Callers decide whether to
/// retry the whole operation from a fresh read.
pub fn rewrite_partition<D: FlashDevice + ?Sized>(
    device: &mut D,
    partition: PartitionId,
    image: &[u8],
    initial_len: usize,
) -> Result<()> {
    partition.ensure_rewritable().map_err(|e| {
        warn!("Request to rewrite a bogus partition: {}", partition);
        e
    })?;

    let info = device.info(partition).map_err(|e| {
        warn!("Error finding partition {}: {}", partition, e);
        FlashError::NotFound
    })?;
    let len = info.len as usize;

    if image.len() != len {
        return Err(FlashError::LengthMismatch {
            expected: len,
            actual: image.len(),
        });
    }

    if initial_len > len || initial_len % BLOCK_SIZE != 0 {
        return Err(FlashError::InvalidRange { initial_len, len });
    }

    let bm_start = len - bitmap_len(len);
    let bitmap_at = u32::try_from(bm_start)
        .ok()
        .and_then(|start| info.offset.checked_add(start))
        .ok_or(FlashError::InvalidRange { initial_len, len })?;

    info!(
        "Rewriting partition {}: offset {:#x}, length {}, {} live bytes",
        partition, info.offset, len, initial_len
    );

    device.erase(info.offset)?;

    if initial_len > 0 {
        device.write(info.offset, &image[..initial_len])?;
    }

    info!("Writing bitmap at {} ({:#x})", bm_start, bitmap_at);
    device.write(bitmap_at, &image[bm_start..])?;

    Ok(())
}
