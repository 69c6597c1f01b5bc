//! Format partitions back to the empty state

use crate::device::FlashDevice;
use crate::error::{FlashError, Result};
use crate::layout::{PartitionHeader, PartitionId};
use tracing::{info, warn};

/// Erase a partition and write a fresh header block.
///
/// No bitmap is written: an erased region reads back as `0xFF`, which the
/// bitmap interprets as "every slot free".
///
/// A failure after the erase leaves the partition without a header.
pub fn erase_partition<D: FlashDevice + ?Sized>(
    device: &mut D,
    partition: PartitionId,
) -> Result<()> {
    partition.ensure_rewritable().map_err(|e| {
        warn!("Request to delete a bogus partition: {}", partition);
        e
    })?;

    let info = device.info(partition).map_err(|e| {
        warn!("Error finding partition {}: {}", partition, e);
        FlashError::NotFound
    })?;

    info!(
        "Erasing partition {}: offset {:#x}, length {}",
        partition, info.offset, info.len
    );

    device.erase(info.offset)?;
    device.write(info.offset, &PartitionHeader::new(partition).to_bytes())?;

    Ok(())
}

/// Wipe the partitions user data normally lives in: settings, then block bank 1.
///
/// Stops at the first partition that fails.
pub fn erase_flashrom<D: FlashDevice + ?Sized>(device: &mut D) -> Result<()> {
    erase_partition(device, PartitionId::Settings)?;
    erase_partition(device, PartitionId::Block1)?;
    Ok(())
}
