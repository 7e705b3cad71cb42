//! # Address Model
//!
//! Commands never carry host pointers. They carry either a physical address
//! in the consumer's 24-bit address space or a segmented reference that the
//! consumer resolves against its segment table at execution time.
//!
//! ```text
//!  31      28 27    24 23                                0
//! ┌──────────┬────────┬───────────────────────────────────┐
//! │ reserved │  seg   │              offset               │
//! └──────────┴────────┴───────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of entries in a segment table.
pub const SEGMENT_COUNT: usize = 16;

/// Size of the physical address space (24 bits).
pub const PHYS_ADDR_LIMIT: u32 = 0x0100_0000;

const OFFSET_MASK: u32 = 0x00FF_FFFF;

/// Small integer naming an entry of the segment table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(u8);

impl SegmentId {
    /// Identity segment. Always mapped to physical zero.
    pub const PHYSICAL: Self = Self(0x00);
    /// Scene-wide data block.
    pub const SCENE: Self = Self(0x02);
    /// Active room geometry.
    pub const ROOM: Self = Self(0x03);
    /// Assets resident for the whole session.
    pub const COMMON: Self = Self(0x04);
    /// Assets resident for the current area.
    pub const AREA: Self = Self(0x05);
    /// Data block of the object currently being drawn.
    pub const OBJECT: Self = Self(0x06);
    /// Base of the frame arena the task was built in.
    pub const WORK: Self = Self(0x0E);
    /// Framebuffer being rendered this frame.
    pub const FRAMEBUFFER: Self = Self(0x0F);

    /// Creates a segment id, returning `None` when out of range.
    #[inline]
    #[must_use]
    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < SEGMENT_COUNT {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the table index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this segment in a 16-bit set mask.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << self.0
    }
}

/// Physical address in the consumer's address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysAddr(pub u32);

impl PhysAddr {
    /// Returns the raw address.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Adds a byte offset.
    #[inline]
    #[must_use]
    pub const fn add(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }

    /// Expresses this address through the identity segment.
    #[inline]
    #[must_use]
    pub const fn segmented(self) -> SegAddr {
        SegAddr::new(SegmentId::PHYSICAL, self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Segment-relative reference, resolved by the consumer when executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SegAddr(u32);

impl SegAddr {
    /// Builds a reference to `offset` within `segment`.
    ///
    /// The offset is truncated to 24 bits.
    #[inline]
    #[must_use]
    pub const fn new(segment: SegmentId, offset: u32) -> Self {
        Self(((segment.0 as u32) << 24) | (offset & OFFSET_MASK))
    }

    /// Reinterprets a raw command word.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw encoded word.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Segment this reference goes through.
    #[inline]
    #[must_use]
    pub const fn segment(self) -> SegmentId {
        SegmentId(((self.0 >> 24) & 0x0F) as u8)
    }

    /// Byte offset within the segment.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }
}

impl fmt::Display for SegAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segaddr_fields() {
        let addr = SegAddr::new(SegmentId::ROOM, 0x0001_2340);
        assert_eq!(addr.raw(), 0x0301_2340);
        assert_eq!(addr.segment(), SegmentId::ROOM);
        assert_eq!(addr.offset(), 0x0001_2340);
    }

    #[test]
    fn test_segment_id_range() {
        assert!(SegmentId::new(15).is_some());
        assert!(SegmentId::new(16).is_none());
        assert_eq!(SegmentId::FRAMEBUFFER.bit(), 0x8000);
    }

    #[test]
    fn test_physical_is_identity_segment() {
        let seg = PhysAddr(0x0010_0040).segmented();
        assert_eq!(seg.segment(), SegmentId::PHYSICAL);
        assert_eq!(seg.offset(), 0x0010_0040);
    }
}
