//! Property-based tests for compaction invariants
//!
//! Uses proptest to check that compaction keeps the bitmap and the data
//! region consistent across random partition contents.

use flashrom_rs::layout::{bitmap_offset, block_type, data_slot_limit};
use flashrom_rs::{
    AllocationBitmap, AllocationBitmapMut, CompactOutcome, Compaction, Compactor, IdMatching,
    PartitionHeader, PartitionId, RemovalRequest, BLOCK_SIZE,
};
use proptest::prelude::*;

const LEN: usize = 8192;

/// Helper: Build a formatted image with one live block per id
fn image_with(ids: &[u16]) -> Vec<u8> {
    let mut image = vec![0xFF; LEN];
    image[..BLOCK_SIZE].copy_from_slice(&PartitionHeader::new(PartitionId::Block1).to_bytes());

    let bitmap_start = bitmap_offset(LEN);
    for (slot, id) in ids.iter().enumerate() {
        let start = (slot + 1) * BLOCK_SIZE;
        image[start..start + BLOCK_SIZE].fill(slot as u8);
        image[start..start + 2].copy_from_slice(&id.to_le_bytes());
        AllocationBitmapMut::new(&mut image[bitmap_start..]).mark_occupied(slot);
    }
    image
}

fn compact(image: &[u8], request: &RemovalRequest) -> Compaction {
    match Compactor::default().compact(image, request).unwrap() {
        CompactOutcome::Compacted(c) => c,
        CompactOutcome::Empty => panic!("expected a compaction"),
    }
}

fn live_ids(image: &[u8]) -> Vec<u16> {
    let bitmap = AllocationBitmap::new(&image[bitmap_offset(LEN)..]);
    (0..bitmap.live_slots().min(data_slot_limit(LEN)))
        .map(|slot| {
            let start = (slot + 1) * BLOCK_SIZE;
            block_type(&image[start..start + BLOCK_SIZE])
        })
        .collect()
}

fn ids_strategy() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::vec(0u16..6, 1..=data_slot_limit(LEN))
}

proptest! {
    #[test]
    fn prop_empty_request_is_identity(ids in ids_strategy()) {
        let image = image_with(&ids);
        let result = compact(&image, &RemovalRequest::default());

        prop_assert_eq!(result.removed, 0);
        prop_assert_eq!(result.blocks_to_persist, ids.len() + 1);
        prop_assert_eq!(result.image, image);
    }

    #[test]
    fn prop_survivors_keep_order(
        ids in ids_strategy(),
        remove in prop::collection::btree_set(0u16..6, 0..4)
    ) {
        let image = image_with(&ids);
        let request: RemovalRequest = remove.iter().copied().collect();
        let result = compact(&image, &request);

        let expected: Vec<u16> = ids.iter().copied().filter(|id| !remove.contains(id)).collect();
        prop_assert_eq!(live_ids(&result.image), expected.clone());
        prop_assert_eq!(result.survivors(), expected.len());
        prop_assert_eq!(result.removed, ids.len() - expected.len());
        prop_assert_eq!(result.removed_slots.len(), result.removed);
    }

    #[test]
    fn prop_bitmap_is_contiguous_prefix(
        ids in ids_strategy(),
        remove in prop::collection::btree_set(0u16..6, 0..4)
    ) {
        let image = image_with(&ids);
        let request: RemovalRequest = remove.into_iter().collect();
        let result = compact(&image, &request);

        let bitmap = AllocationBitmap::new(&result.image[bitmap_offset(LEN)..]);
        prop_assert!(bitmap.is_contiguous());
        prop_assert_eq!(bitmap.occupied_count(), result.survivors());

        // Everything between the survivors and the bitmap is erased
        let tail = &result.image[result.live_len()..bitmap_offset(LEN)];
        prop_assert!(tail.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn prop_remove_all_leaves_header_only(ids in ids_strategy()) {
        let image = image_with(&ids);
        let request: RemovalRequest = ids.iter().copied().collect();
        let result = compact(&image, &request);

        prop_assert_eq!(result.blocks_to_persist, 1);
        prop_assert_eq!(result.live_len(), BLOCK_SIZE);
        prop_assert_eq!(result.removed, ids.len());
        prop_assert_eq!(&result.image[..BLOCK_SIZE], &image[..BLOCK_SIZE]);
    }

    #[test]
    fn prop_compaction_is_idempotent(
        ids in ids_strategy(),
        remove in prop::collection::btree_set(0u16..6, 1..4)
    ) {
        let image = image_with(&ids);
        let request: RemovalRequest = remove.into_iter().collect();
        let first = compact(&image, &request);

        match Compactor::default().compact(&first.image, &request).unwrap() {
            CompactOutcome::Empty => prop_assert_eq!(first.survivors(), 0),
            CompactOutcome::Compacted(second) => {
                prop_assert_eq!(second.removed, 0);
                prop_assert_eq!(second.image, first.image);
            }
        }
    }

    #[test]
    fn prop_low_byte_matches_superset_of_full(
        ids in prop::collection::vec(any::<u16>(), 1..64),
        target in any::<u8>()
    ) {
        let image = image_with(&ids);
        let request = RemovalRequest::single(target as u16);

        let full = compact(&image, &request);
        let low = match Compactor::new(IdMatching::LowByte).compact(&image, &request).unwrap() {
            CompactOutcome::Compacted(c) => c,
            CompactOutcome::Empty => panic!("expected a compaction"),
        };

        prop_assert!(low.removed >= full.removed);
        let expected = ids.iter().filter(|&&id| id & 0xFF == target as u16).count();
        prop_assert_eq!(low.removed, expected);
    }
}
