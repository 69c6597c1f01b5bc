#![no_main]
use flashrom_rs::layout::bitmap_offset;
use flashrom_rs::{AllocationBitmap, CompactOutcome, Compactor, IdMatching, RemovalRequest};
use libfuzzer_sys::fuzz_target;

// Arbitrary partition images must never panic the compactor, and every
// successful compaction leaves a contiguous bitmap.
fuzz_target!(|input: (Vec<u8>, Vec<u16>, bool)| {
    let (image, ids, low_byte) = input;
    let matching = if low_byte {
        IdMatching::LowByte
    } else {
        IdMatching::Full
    };
    let request: RemovalRequest = ids.into_iter().collect();

    if let Ok(CompactOutcome::Compacted(c)) = Compactor::new(matching).compact(&image, &request) {
        assert_eq!(c.image.len(), image.len());
        let bitmap = AllocationBitmap::new(&c.image[bitmap_offset(image.len())..]);
        assert!(bitmap.is_contiguous());
        assert_eq!(bitmap.occupied_count(), c.survivors());
    }
});
