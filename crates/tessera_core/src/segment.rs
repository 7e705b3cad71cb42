//! # Segment Table
//!
//! Indirection from small segment ids to physical base addresses.
//!
//! The consumer resolves segmented references lazily, when it executes the
//! referencing command, against whatever mapping is current at that point of
//! the stream. A mapping therefore has to be written before any command that
//! depends on it *in execution order*, which across buffers means chain order
//! rather than the order the CPU emitted things in.
//!
//! To make that contract checkable the table records, per stream, which ids
//! were set during the current frame. A reference from stream `s` is valid
//! if the id was set in `s` or in any stream chained before `s`.

use crate::address::{PhysAddr, SegAddr, SegmentId, SEGMENT_COUNT};
use crate::error::{CoreError, CoreResult};

/// Maximum number of chained streams tracked per frame.
pub const MAX_STREAMS: usize = 8;

/// Segment table with per-frame set tracking.
#[derive(Debug, Clone)]
pub struct SegmentTable {
    /// Physical base of every segment.
    bases: [u32; SEGMENT_COUNT],
    /// Ids set during the current frame, per stream.
    set_masks: [u16; MAX_STREAMS],
    /// Frame the masks belong to.
    frame: u64,
}

impl SegmentTable {
    /// Creates an empty table. Only the identity segment is mapped.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bases: [0; SEGMENT_COUNT],
            set_masks: [SegmentId::PHYSICAL.bit(), 0, 0, 0, 0, 0, 0, 0],
            frame: 0,
        }
    }

    /// Starts a new frame.
    ///
    /// Mappings keep their values but none count as set any more: every id a
    /// frame references must be written again during that frame.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.set_masks = [0; MAX_STREAMS];
        self.set_masks[0] = SegmentId::PHYSICAL.bit();
    }

    /// Frame the set tracking currently belongs to.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Overwrites the mapping for `id`, recording it as set by `stream`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] if `stream` is not tracked.
    pub fn set(&mut self, id: SegmentId, base: PhysAddr, stream: usize) -> CoreResult<()> {
        let mask = self.set_masks.get_mut(stream).ok_or_else(|| {
            CoreError::InvalidConfig(format!("stream {stream} exceeds {MAX_STREAMS} tracked streams"))
        })?;
        *mask |= id.bit();
        self.bases[id.index()] = base.get();
        tracing::trace!(segment = id.get(), base = %base, stream, "segment set");
        Ok(())
    }

    /// Returns true if `id` has been set this frame, in any stream.
    #[inline]
    #[must_use]
    pub fn is_set(&self, id: SegmentId) -> bool {
        self.set_masks.iter().any(|m| m & id.bit() != 0)
    }

    /// Checks that a reference emitted into `stream` will see a mapping
    /// written during this frame.
    ///
    /// # Errors
    ///
    /// [`CoreError::SegmentUnset`] when no stream up to and including
    /// `stream` has set the segment.
    pub fn check_visible(&self, addr: SegAddr, stream: usize) -> CoreResult<()> {
        let segment = addr.segment();
        let last = stream.min(MAX_STREAMS - 1);
        let visible = self.set_masks[..=last].iter().fold(0u16, |acc, m| acc | m);
        if visible & segment.bit() == 0 {
            tracing::error!(segment = segment.get(), stream, addr = %addr, "segment referenced before set");
            return Err(CoreError::SegmentUnset {
                segment: segment.get(),
                stream,
            });
        }
        Ok(())
    }

    /// Resolves a segmented reference against the current mapping.
    ///
    /// This is the consumer-side lookup. Producers only write the table.
    #[inline]
    #[must_use]
    pub fn resolve(&self, addr: SegAddr) -> PhysAddr {
        let base = self.bases[addr.segment().index()];
        PhysAddr(base.wrapping_add(addr.offset()))
    }

    /// Current base of a segment, regardless of whether it was set this frame.
    #[inline]
    #[must_use]
    pub fn base(&self, id: SegmentId) -> PhysAddr {
        PhysAddr(self.bases[id.index()])
    }
}

impl Default for SegmentTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_current_mapping() {
        let mut table = SegmentTable::new();
        table.set(SegmentId::ROOM, PhysAddr(0x0020_0000), 0).unwrap();
        let addr = SegAddr::new(SegmentId::ROOM, 0x40);
        assert_eq!(table.resolve(addr), PhysAddr(0x0020_0040));

        table.set(SegmentId::ROOM, PhysAddr(0x0030_0000), 0).unwrap();
        assert_eq!(table.resolve(addr), PhysAddr(0x0030_0040));
    }

    #[test]
    fn test_physical_always_visible() {
        let table = SegmentTable::new();
        assert!(table.check_visible(PhysAddr(0x100).segmented(), 3).is_ok());
    }

    #[test]
    fn test_unset_is_reported() {
        let table = SegmentTable::new();
        let err = table
            .check_visible(SegAddr::new(SegmentId::OBJECT, 0), 1)
            .unwrap_err();
        assert_eq!(err, CoreError::SegmentUnset { segment: 6, stream: 1 });
    }

    #[test]
    fn test_visibility_follows_chain_order() {
        let mut table = SegmentTable::new();
        table.set(SegmentId::SCENE, PhysAddr(0x1000), 1).unwrap();
        let addr = SegAddr::new(SegmentId::SCENE, 0);

        // Set in stream 1: visible to 1 and everything chained after it.
        assert!(table.check_visible(addr, 1).is_ok());
        assert!(table.check_visible(addr, 3).is_ok());
        // Stream 0 executes before stream 1 and would see a stale mapping.
        assert!(table.check_visible(addr, 0).is_err());
    }

    #[test]
    fn test_begin_frame_clears_set_bits() {
        let mut table = SegmentTable::new();
        table.set(SegmentId::OBJECT, PhysAddr(0x2000), 0).unwrap();
        assert!(table.is_set(SegmentId::OBJECT));

        table.begin_frame(1);
        assert!(!table.is_set(SegmentId::OBJECT));
        assert!(table.is_set(SegmentId::PHYSICAL));
        // The stale value survives but does not count.
        assert_eq!(table.base(SegmentId::OBJECT), PhysAddr(0x2000));
        assert!(table
            .check_visible(SegAddr::new(SegmentId::OBJECT, 0), 0)
            .is_err());
    }
}
