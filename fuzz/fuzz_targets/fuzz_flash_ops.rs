#![no_main]
use arbitrary::Arbitrary;
use flashrom_rs::{FlashDevice, Flashrom, MemoryFlash, PartitionId, PartitionTable, RemovalRequest};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Operation {
    Write { offset: u32, data: Vec<u8> },
    Purge { partition: u8, ids: Vec<u16> },
    Erase { partition: u8 },
    Serials,
}

// Random write/purge/erase sequences against an in-memory flashrom must only
// ever fail with errors, never panics.
fuzz_target!(|ops: Vec<Operation>| {
    let mut flash = Flashrom::new(MemoryFlash::formatted(PartitionTable::dreamcast()));

    for op in ops.into_iter().take(64) {
        match op {
            Operation::Write { offset, data } => {
                let _ = flash.device_mut().write(offset % 0x20000, &data);
            }
            Operation::Purge { partition, ids } => {
                if let Ok(partition) = PartitionId::from_u8(partition % 5) {
                    let _ = flash.purge_blocks(partition, &RemovalRequest::new(ids));
                }
            }
            Operation::Erase { partition } => {
                if let Ok(partition) = PartitionId::from_u8(partition % 5) {
                    let _ = flash.erase_partition(partition);
                }
            }
            Operation::Serials => {
                let _ = flash.serial_numbers();
            }
        }
    }
});
