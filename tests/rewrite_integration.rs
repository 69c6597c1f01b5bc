//! Rewrite and erase integration tests
//!
//! Runs the device-facing operations against a recording adapter, so the
//! exact sequence of device calls can be checked.

use flashrom_rs::layout::bitmap_len;
use flashrom_rs::{
    DeviceError, FlashDevice, FlashError, Flashrom, MemoryFlash, PartitionHeader, PartitionId,
    PartitionInfo, PartitionTable, RemovalRequest, BLOCK_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Erase(u32),
    Write(u32, usize),
}

/// Helper: Memory flash that records every mutating call
struct RecordingFlash {
    inner: MemoryFlash,
    calls: Vec<Call>,
    fail_writes: bool,
}

impl RecordingFlash {
    fn new() -> Self {
        RecordingFlash {
            inner: MemoryFlash::formatted(PartitionTable::dreamcast()),
            calls: Vec::new(),
            fail_writes: false,
        }
    }
}

impl FlashDevice for RecordingFlash {
    fn info(&self, partition: PartitionId) -> Result<PartitionInfo, DeviceError> {
        self.inner.info(partition)
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.inner.read(offset, buf)
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.calls.push(Call::Write(offset, data.len()));
        if self.fail_writes {
            return Err(DeviceError::OutOfBounds {
                offset,
                len: data.len(),
            });
        }
        self.inner.write(offset, data)
    }

    fn erase(&mut self, offset: u32) -> Result<(), DeviceError> {
        self.calls.push(Call::Erase(offset));
        self.inner.erase(offset)
    }

    fn read_block(
        &self,
        partition: PartitionId,
        block_id: u16,
    ) -> Result<[u8; BLOCK_SIZE], DeviceError> {
        self.inner.read_block(partition, block_id)
    }
}

/// Helper: Append live blocks to a partition of the recording flash
fn fill_partition(flash: &mut RecordingFlash, partition: PartitionId, ids: &[u16]) {
    let info = flash.inner.info(partition).unwrap();
    for (slot, id) in ids.iter().enumerate() {
        let mut block = [0x5A; BLOCK_SIZE];
        block[..2].copy_from_slice(&id.to_le_bytes());
        block[2] = slot as u8;
        let at = info.offset + ((slot + 1) * BLOCK_SIZE) as u32;
        flash.inner.write(at, &block).unwrap();
    }

    let bitmap_at = info.offset + info.len - bitmap_len(info.len as usize) as u32;
    let mut bitmap = vec![0xFF; ids.len().div_ceil(8)];
    for slot in 0..ids.len() {
        bitmap[slot >> 3] &= !(0x80 >> (slot & 7));
    }
    flash.inner.write(bitmap_at, &bitmap).unwrap();
}

#[test]
fn test_invalid_range_never_touches_device() {
    let mut flash = Flashrom::new(RecordingFlash::new());
    let info = flash.device().info(PartitionId::Block1).unwrap();
    let image = vec![0xFF; info.len as usize];

    let result = flash.rewrite_partition(PartitionId::Block1, &image, info.len as usize + 64);
    assert!(matches!(result, Err(FlashError::InvalidRange { .. })));
    assert!(flash.device().calls.is_empty());
}

#[test]
fn test_length_mismatch_never_touches_device() {
    let mut flash = Flashrom::new(RecordingFlash::new());
    let result = flash.rewrite_partition(PartitionId::Settings, &[0xFF; 0x2000], 64);

    assert!(matches!(
        result,
        Err(FlashError::LengthMismatch {
            expected: 0x8000,
            actual: 0x2000
        })
    ));
    assert!(flash.device().calls.is_empty());
}

#[test]
fn test_system_partition_is_never_rewritten() {
    let mut flash = Flashrom::new(RecordingFlash::new());
    let result = flash.rewrite_partition(PartitionId::System, &[0xFF; 0x2000], 64);

    assert!(matches!(result, Err(FlashError::InvalidPartition(0))));
    assert!(flash.device().calls.is_empty());
}

#[test]
fn test_purge_call_sequence() {
    let mut device = RecordingFlash::new();
    fill_partition(&mut device, PartitionId::Block1, &[0x0007, 0x0012, 0x0007]);
    let mut flash = Flashrom::new(device);

    let removed = flash
        .purge_blocks(PartitionId::Block1, &RemovalRequest::single(0x0007))
        .unwrap();
    assert_eq!(removed, 2);

    // Erase, then header plus one survivor, then the bitmap
    let info = flash.device().info(PartitionId::Block1).unwrap();
    let bm_len = bitmap_len(info.len as usize);
    assert_eq!(
        flash.device().calls,
        vec![
            Call::Erase(info.offset),
            Call::Write(info.offset, 2 * BLOCK_SIZE),
            Call::Write(info.offset + info.len - bm_len as u32, bm_len),
        ]
    );

    let image = flash.read_partition(PartitionId::Block1).unwrap();
    let survivor = image.data_block(0).unwrap();
    assert_eq!(&survivor[..3], &[0x12, 0x00, 0x01]);
    assert!(image.data_block(1).unwrap().iter().all(|&b| b == 0xFF));
}

#[test]
fn test_write_failure_after_erase_loses_partition() {
    let mut device = RecordingFlash::new();
    fill_partition(&mut device, PartitionId::Block1, &[0x0003, 0x0007]);
    device.fail_writes = true;
    let mut flash = Flashrom::new(device);

    let result = flash.purge_blocks(PartitionId::Block1, &RemovalRequest::single(0x0007));
    assert!(matches!(result, Err(FlashError::Device(_))));

    // The erase already happened; nothing is restored
    let info = flash.device().info(PartitionId::Block1).unwrap();
    let bytes = &flash.device().inner.as_bytes()
        [info.offset as usize..(info.offset + info.len) as usize];
    assert!(bytes.iter().all(|&b| b == 0xFF));
}

#[test]
fn test_erase_partition_writes_fresh_header() {
    let mut device = RecordingFlash::new();
    fill_partition(&mut device, PartitionId::Block2, &[0x0001, 0x0002]);
    let mut flash = Flashrom::new(device);

    flash.erase_partition(PartitionId::Block2).unwrap();

    let image = flash.read_partition(PartitionId::Block2).unwrap();
    assert_eq!(image.header().unwrap(), PartitionHeader::new(PartitionId::Block2));
    assert!(image.bitmap().is_empty());
    assert_eq!(image.live_blocks().count(), 0);
}

#[test]
fn test_erase_flashrom_order() {
    let mut flash = Flashrom::new(RecordingFlash::new());
    flash.erase_flashrom().unwrap();

    let settings = flash.device().info(PartitionId::Settings).unwrap();
    let block1 = flash.device().info(PartitionId::Block1).unwrap();
    assert_eq!(
        flash.device().calls,
        vec![
            Call::Erase(settings.offset),
            Call::Write(settings.offset, BLOCK_SIZE),
            Call::Erase(block1.offset),
            Call::Write(block1.offset, BLOCK_SIZE),
        ]
    );
}

#[test]
fn test_erase_serial_numbers_then_read_fails() {
    let mut device = RecordingFlash::new();
    fill_partition(&mut device, PartitionId::Block1, &[0x0005, 0x0007, 0x0007]);
    let mut flash = Flashrom::new(device);

    assert!(flash.serial_numbers().is_ok());
    assert_eq!(flash.erase_serial_numbers().unwrap(), 2);
    assert!(matches!(flash.serial_numbers(), Err(FlashError::NotFound)));

    // Nothing left to remove: no further device traffic
    let calls = flash.device().calls.len();
    assert_eq!(flash.erase_serial_numbers().unwrap(), 0);
    assert_eq!(flash.device().calls.len(), calls);
}
