//! Page-boundary write planning
//!
//! Serial EEPROMs wrap a write that runs past the end of a page back to
//! the page start, silently overwriting it. [`PagePlan`] cuts an arbitrary
//! `(address, len)` range into segments that each stay inside one page:
//! the partial head up to the next page boundary, whole pages, then the
//! partial tail.

/// One page-bounded piece of a larger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// Memory address of the first byte
    pub address: u32,
    /// Offset of the first byte within the source buffer
    pub offset: usize,
    /// Number of bytes
    pub len: usize,
}

/// Iterator over the page-bounded segments of a write
///
/// `page_size` must be a power of two.
#[derive(Debug, Clone)]
pub struct PagePlan {
    address: u32,
    offset: usize,
    remaining: usize,
    page_size: u32,
}

impl PagePlan {
    /// Plan a write of `len` bytes at `address`
    pub fn new(address: u32, len: usize, page_size: u16) -> Self {
        Self {
            address,
            offset: 0,
            remaining: len,
            page_size: page_size as u32,
        }
    }
}

impl Iterator for PagePlan {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.remaining == 0 {
            return None;
        }
        let room = (self.page_size - (self.address & (self.page_size - 1))) as usize;
        let len = room.min(self.remaining);
        let segment = Segment {
            address: self.address,
            offset: self.offset,
            len,
        };
        self.address += len as u32;
        self.offset += len;
        self.remaining -= len;
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    #[test]
    fn test_unaligned_long_write() {
        let plan: Vec<_> = PagePlan::new(0x017F, 300, 128).collect();
        assert_eq!(
            plan,
            [
                Segment { address: 0x017F, offset: 0, len: 1 },
                Segment { address: 0x0180, offset: 1, len: 128 },
                Segment { address: 0x0200, offset: 129, len: 128 },
                Segment { address: 0x0280, offset: 257, len: 43 },
            ]
        );
    }

    #[test]
    fn test_fits_in_page() {
        let plan: Vec<_> = PagePlan::new(0x0100, 10, 128).collect();
        assert_eq!(plan, [Segment { address: 0x0100, offset: 0, len: 10 }]);
    }

    #[test]
    fn test_aligned_whole_pages() {
        let lens: Vec<_> = PagePlan::new(0x0080, 256, 128).map(|s| s.len).collect();
        assert_eq!(lens, [128, 128]);
    }

    #[test]
    fn test_empty_write() {
        assert_eq!(PagePlan::new(0x0042, 0, 128).count(), 0);
    }

    #[test]
    fn test_ends_at_top_of_memory() {
        let plan: Vec<_> = PagePlan::new(0xFFF0, 16, 128).collect();
        assert_eq!(plan, [Segment { address: 0xFFF0, offset: 0, len: 16 }]);
    }

    proptest! {
        #[test]
        fn prop_segments_cover_range_within_pages(
            address in 0u32..0x1_0000,
            len in 0usize..2048,
            shift in 0u32..9,
        ) {
            let page = 1u32 << shift;
            let len = len.min((0x1_0000 - address) as usize);

            let mut expected_address = address;
            let mut expected_offset = 0;
            for segment in PagePlan::new(address, len, page as u16) {
                prop_assert!(segment.len > 0);
                prop_assert_eq!(segment.address, expected_address);
                prop_assert_eq!(segment.offset, expected_offset);

                let page_start = segment.address & !(page - 1);
                let end = segment.address + segment.len as u32;
                prop_assert!(end <= page_start + page);

                expected_address = end;
                expected_offset += segment.len;
            }
            prop_assert_eq!(expected_offset, len);
        }
    }
}
