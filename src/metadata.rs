//! Serial number extraction from the key block
//!
//! The key block is a single data block in the first block bank. Bytes 2..6
//! carry a short tag whose last two characters are expected to be `1S`; two
//! little-endian u32 serial numbers sit at fixed offsets.

use crate::device::FlashDevice;
use crate::error::{FlashError, Result};
use crate::layout::{PartitionId, BLOCK_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use validator::Validate;

pub const KEY_BLOCK_ID: u16 = 0x0007;

/// Where the key block lives and how its fields are laid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeyBlockConfig {
    pub partition: PartitionId,

    pub block_id: u16,

    /// Expected marker characters at `marker_offset`
    pub marker: String,

    #[validate(range(max = 62))]
    pub marker_offset: usize,

    #[validate(range(max = 60))]
    pub v1_offset: usize,

    #[validate(range(max = 60))]
    pub v2_offset: usize,
}

impl Default for KeyBlockConfig {
    fn default() -> Self {
        KeyBlockConfig {
            partition: PartitionId::Block1,
            block_id: KEY_BLOCK_ID,
            marker: "1S".to_string(),
            marker_offset: 4,
            v1_offset: 14,
            v2_offset: 26,
        }
    }
}

/// Raw serial number fields. `0` and `0xFFFFFFFF` mean "not present".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SerialNumbers {
    pub v1: u32,
    pub v2: u32,
}

impl SerialNumbers {
    pub fn is_present(value: u32) -> bool {
        value != 0 && value != u32::MAX
    }

    pub fn v1(&self) -> Option<u32> {
        Some(self.v1).filter(|&v| Self::is_present(v))
    }

    pub fn v2(&self) -> Option<u32> {
        Some(self.v2).filter(|&v| Self::is_present(v))
    }

    /// Decode both fields from a raw key block
    pub fn from_block(block: &[u8; BLOCK_SIZE], layout: &KeyBlockConfig) -> Result<Self> {
        Ok(SerialNumbers {
            v1: read_u32_le(block, layout.v1_offset)?,
            v2: read_u32_le(block, layout.v2_offset)?,
        })
    }
}

fn read_u32_le(block: &[u8], offset: usize) -> Result<u32> {
    let field = offset
        .checked_add(4)
        .and_then(|end| block.get(offset..end))
        .ok_or_else(|| {
            FlashError::Config(format!("serial number offset {} is outside the key block", offset))
        })?;
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

fn printable(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    }
}

/// Read the key block straight from the device and decode the serial numbers.
///
/// A marker mismatch is only logged; decoding proceeds anyway. A layout that
/// fails validation is rejected with `Config` before the device is read.
pub fn read_serial_numbers<D: FlashDevice + ?Sized>(
    device: &D,
    layout: &KeyBlockConfig,
) -> Result<SerialNumbers> {
    layout
        .validate()
        .map_err(|e| FlashError::Config(e.to_string()))?;

    let block = device
        .read_block(layout.partition, layout.block_id)
        .map_err(|e| {
            warn!("Error finding key block: {}", e);
            FlashError::NotFound
        })?;

    let tag: String = block[2..6].iter().map(|&b| printable(b)).collect();
    debug!("Block magic: {}", tag);

    let marker = layout.marker.as_bytes();
    let end = layout.marker_offset + marker.len();
    if block.get(layout.marker_offset..end) != Some(marker) {
        warn!("Key block looks incorrect (tag {:?}), trying anyway", tag);
    }

    let serials = SerialNumbers::from_block(&block, layout)?;
    info!("v1 key: {:08X}, v2 key: {:08X}", serials.v1, serials.v2);

    Ok(serials)
}
