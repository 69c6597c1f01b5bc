//! Allocation bitmap stored at the tail of every partition
//!
//! One bit per data slot, most significant bit first within each byte:
//! - 1 = free (never written since the last erase)
//! - 0 = occupied
//!
//! Occupied slots always form a contiguous prefix starting at slot 0, so the
//! first free bit marks the end of live data.

/// Read-only view over bitmap bytes
#[derive(Debug, Clone, Copy)]
pub struct AllocationBitmap<'a> {
    bytes: &'a [u8],
}

impl<'a> AllocationBitmap<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        AllocationBitmap { bytes }
    }

    /// Number of slots the bitmap can describe
    pub fn capacity(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Check if a slot is free. Slots past the end of the bitmap count as free.
    pub fn is_free(&self, slot: usize) -> bool {
        match self.bytes.get(slot >> 3) {
            Some(byte) => byte & (0x80 >> (slot & 7)) != 0,
            None => true,
        }
    }

    /// An all-free first byte means nothing was ever written
    pub fn is_empty(&self) -> bool {
        self.bytes.first().map_or(true, |&b| b == 0xFF)
    }

    /// Length of the occupied prefix (index of the first free slot)
    pub fn live_slots(&self) -> usize {
        (0..self.capacity())
            .find(|&slot| self.is_free(slot))
            .unwrap_or(self.capacity())
    }

    /// Total number of occupied bits, wherever they are
    pub fn occupied_count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_zeros() as usize).sum()
    }

    /// True when every occupied bit belongs to the leading run
    pub fn is_contiguous(&self) -> bool {
        self.occupied_count() == self.live_slots()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Mutable view over bitmap bytes
#[derive(Debug)]
pub struct AllocationBitmapMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> AllocationBitmapMut<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        AllocationBitmapMut { bytes }
    }

    /// Reset every slot to free
    pub fn clear(&mut self) {
        self.bytes.fill(0xFF);
    }

    pub fn mark_occupied(&mut self, slot: usize) {
        self.bytes[slot >> 3] &= !(0x80 >> (slot & 7));
    }

    pub fn mark_free(&mut self, slot: usize) {
        self.bytes[slot >> 3] |= 0x80 >> (slot & 7);
    }

    pub fn view(&self) -> AllocationBitmap<'_> {
        AllocationBitmap::new(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bitmap() {
        let bytes = [0xFF; 64];
        let bitmap = AllocationBitmap::new(&bytes);
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.live_slots(), 0);
        assert_eq!(bitmap.occupied_count(), 0);
        assert!(bitmap.is_contiguous());
    }

    #[test]
    fn test_msb_first_bit_order() {
        let mut bytes = [0xFF; 2];
        let mut bitmap = AllocationBitmapMut::new(&mut bytes);
        bitmap.mark_occupied(0);
        bitmap.mark_occupied(9);
        assert_eq!(bytes, [0x7F, 0xBF]);
    }

    #[test]
    fn test_live_slots_stops_at_first_free() {
        // Slots 0..3 occupied, slot 3 free, slot 4 occupied (a gap)
        let bytes = [0b0001_0111, 0xFF];
        let bitmap = AllocationBitmap::new(&bytes);
        assert!(!bitmap.is_empty());
        assert_eq!(bitmap.live_slots(), 3);
        assert_eq!(bitmap.occupied_count(), 4);
        assert!(!bitmap.is_contiguous());
    }

    #[test]
    fn test_full_bitmap() {
        let bytes = [0x00; 4];
        let bitmap = AllocationBitmap::new(&bytes);
        assert_eq!(bitmap.live_slots(), 32);
        assert!(bitmap.is_free(32));
        assert!(bitmap.is_contiguous());
    }

    #[test]
    fn test_mark_free_and_clear() {
        let mut bytes = [0x00; 2];
        let mut bitmap = AllocationBitmapMut::new(&mut bytes);
        bitmap.mark_free(15);
        assert_eq!(bitmap.view().live_slots(), 15);
        bitmap.clear();
        assert!(bitmap.view().is_empty());
    }
}
