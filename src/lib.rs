//! # flashrom-rs - Block Maintenance for Partitioned Flashroms
//!
//! `flashrom-rs` reads, compacts and rewrites the block-allocated partitions
//! of a small NOR flashrom (the Dreamcast layout by default):
//!
//! - **Fixed 64-byte blocks** with a `KATANA_FLASH____` header block
//! - **Tail-resident allocation bitmap**, one bit per slot, 1 = free
//! - **Block purging** that compacts survivors so live data stays contiguous
//! - **Partition formatting** and **serial number extraction**
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flashrom_rs::{Flashrom, MappedFlash, PartitionTable, RemovalRequest, PartitionId, Result};
//!
//! # fn main() -> Result<()> {
//! let device = MappedFlash::open("dc_flash.bin", PartitionTable::dreamcast())?;
//! let mut flash = Flashrom::new(device);
//!
//! let serials = flash.serial_numbers()?;
//! if let Some(v1) = serials.v1() {
//!     println!("v1 serial: {:X}", v1);
//! }
//!
//! let removed = flash.purge_blocks(PartitionId::Block1, &RemovalRequest::single(0x0007))?;
//! println!("Removed {} blocks", removed);
//! flash.device().flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Data safety
//!
//! Rewriting and erasing are erase-then-write sequences with no rollback. An
//! error or power loss part way through loses the partition contents.

pub mod bitmap;
pub mod compactor;
pub mod config;
pub mod device;
pub mod eraser;
pub mod error;
pub mod image;
pub mod layout;
pub mod menu;
pub mod metadata;
pub mod rewriter;

pub use crate::{
    bitmap::{AllocationBitmap, AllocationBitmapMut},
    compactor::{CompactOutcome, Compaction, Compactor, IdMatching, RemovalRequest},
    config::Config,
    device::{
        DeviceError, FlashArray, FlashDevice, MappedFlash, MemoryFlash, PartitionInfo,
        PartitionTable,
    },
    error::{FlashError, Result},
    image::PartitionImage,
    layout::{PartitionHeader, PartitionId, BLOCK_SIZE, MAGIC},
    menu::{ActionOutcome, Buttons, Menu, MenuAction, MenuState},
    metadata::{KeyBlockConfig, SerialNumbers},
};

use serde::Serialize;
use tracing::{debug, info};

/// Health summary of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub partition: PartitionId,
    pub offset: u32,
    pub len: u32,

    /// Header magic is intact
    pub formatted: bool,

    /// Length of the occupied prefix
    pub live_blocks: usize,

    /// Occupied bits anywhere in the bitmap
    pub occupied_bits: usize,

    /// Every occupied bit belongs to the leading run
    pub contiguous: bool,
}

/// Flashrom maintenance over a device adapter
///
/// Owns the device and the tool configuration; every operation reads fresh
/// state from the device.
pub struct Flashrom<D: FlashDevice> {
    device: D,
    config: Config,
}

impl<D: FlashDevice> Flashrom<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, Config::default())
    }

    pub fn with_config(device: D, config: Config) -> Self {
        Flashrom { device, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    pub fn compactor(&self) -> Compactor {
        Compactor::new(self.config.id_matching)
    }

    /// Read a whole partition
    pub fn read_partition(&self, partition: PartitionId) -> Result<PartitionImage> {
        PartitionImage::load(&self.device, partition)
    }

    /// Compact an image in memory without touching the device
    pub fn remove_blocks(
        &self,
        image: &PartitionImage,
        request: &RemovalRequest,
    ) -> Result<CompactOutcome> {
        self.compactor().compact(image.as_bytes(), request)
    }

    /// See [`rewriter::rewrite_partition`]
    pub fn rewrite_partition(
        &mut self,
        partition: PartitionId,
        image: &[u8],
        initial_len: usize,
    ) -> Result<()> {
        rewriter::rewrite_partition(&mut self.device, partition, image, initial_len)
    }

    /// Remove matching blocks from a partition and write the result back.
    ///
    /// Returns the number of blocks removed. The device is only written when
    /// something was removed and `dry_run` is off.
    pub fn purge_blocks(&mut self, partition: PartitionId, request: &RemovalRequest) -> Result<usize> {
        let image = self.read_partition(partition)?;

        let compaction = match self.remove_blocks(&image, request)? {
            CompactOutcome::Empty => return Ok(0),
            CompactOutcome::Compacted(c) if c.removed == 0 => {
                debug!("No matching blocks in partition {}", partition);
                return Ok(0);
            }
            CompactOutcome::Compacted(c) => c,
        };

        info!(
            "Need to write first {} blocks (and bitmap) of partition {}",
            compaction.blocks_to_persist, partition
        );

        if self.config.dry_run {
            info!("Dry run: partition {} left untouched", partition);
        } else {
            self.rewrite_partition(partition, &compaction.image, compaction.live_len())?;
        }

        Ok(compaction.removed)
    }

    /// Decode the serial numbers from the key block
    pub fn serial_numbers(&self) -> Result<SerialNumbers> {
        metadata::read_serial_numbers(&self.device, &self.config.key_block)
    }

    /// Purge every copy of the key block. Returns the number of blocks removed.
    pub fn erase_serial_numbers(&mut self) -> Result<usize> {
        let key_block = &self.config.key_block;
        let (partition, request) = (key_block.partition, RemovalRequest::single(key_block.block_id));
        self.purge_blocks(partition, &request)
    }

    pub fn erase_partition(&mut self, partition: PartitionId) -> Result<()> {
        eraser::erase_partition(&mut self.device, partition)
    }

    pub fn erase_flashrom(&mut self) -> Result<()> {
        eraser::erase_flashrom(&mut self.device)
    }

    /// Summarize a partition's header and bitmap
    pub fn summary(&self, partition: PartitionId) -> Result<PartitionSummary> {
        let image = self.read_partition(partition)?;
        layout::check_partition_len(image.len())?;
        let bitmap = image.bitmap();

        Ok(PartitionSummary {
            partition,
            offset: image.offset(),
            len: image.len() as u32,
            formatted: image.header().is_ok(),
            live_blocks: bitmap.live_slots().min(layout::data_slot_limit(image.len())),
            occupied_bits: bitmap.occupied_count(),
            contiguous: bitmap.is_contiguous(),
        })
    }
}
