//! Frame statistics.

use crate::buffer::BufferKind;

/// Fill level of one command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferUsage {
    /// Records written by drawing routines.
    pub records: usize,
    /// Records available to drawing routines.
    pub capacity: usize,
}

impl BufferUsage {
    /// Fraction of the capacity used.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.records as f32 / self.capacity as f32
        }
    }
}

/// Visibility counters, accumulated over every cull in a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    /// Groups tested against the frustum.
    pub tested: u32,
    /// Groups that made it into a depth list.
    pub visible: u32,
    /// Groups outside the frustum.
    pub culled: u32,
    /// Visible groups dropped because the depth list was full.
    pub dropped: u32,
}

impl CullStats {
    /// Adds another cull's counters.
    pub fn merge(&mut self, other: &Self) {
        self.tested += other.tested;
        self.visible += other.visible;
        self.culled += other.culled;
        self.dropped += other.dropped;
    }

    /// Fraction of tested groups rejected by the frustum.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cull_rate(&self) -> f32 {
        if self.tested == 0 {
            0.0
        } else {
            self.culled as f32 / self.tested as f32
        }
    }
}

/// Statistics from one built frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Frame number.
    pub frame: u64,
    /// Per-buffer usage, in chain order.
    pub buffers: [BufferUsage; 4],
    /// Bytes allocated from the arena head.
    pub arena_head: usize,
    /// Bytes allocated from the arena tail.
    pub arena_tail: usize,
    /// Bytes left between the cursors.
    pub arena_free: usize,
    /// Visibility counters.
    pub culling: CullStats,
    /// Time from frame begin to chaining, in milliseconds.
    pub build_time_ms: f32,
}

impl FrameStats {
    /// Usage of one buffer.
    #[inline]
    #[must_use]
    pub fn usage(&self, kind: BufferKind) -> BufferUsage {
        self.buffers[kind.index()]
    }

    /// Records written across all buffers.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.buffers.iter().map(|b| b.records).sum()
    }

    /// Returns true if any buffer is at 90% or more.
    #[must_use]
    pub fn near_capacity(&self) -> bool {
        self.buffers.iter().any(|b| b.utilization() >= 0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let usage = BufferUsage { records: 45, capacity: 50 };
        assert!((usage.utilization() - 0.9).abs() < 1e-6);
        assert_eq!(BufferUsage::default().utilization(), 0.0);
    }

    #[test]
    fn test_near_capacity() {
        let mut stats = FrameStats::default();
        assert!(!stats.near_capacity());
        stats.buffers[BufferKind::Overlay.index()] = BufferUsage { records: 10, capacity: 10 };
        assert!(stats.near_capacity());
        assert_eq!(stats.total_records(), 10);
    }

    #[test]
    fn test_cull_merge() {
        let mut total = CullStats::default();
        total.merge(&CullStats { tested: 4, visible: 3, culled: 1, dropped: 0 });
        total.merge(&CullStats { tested: 4, visible: 1, culled: 3, dropped: 0 });
        assert_eq!(total.tested, 8);
        assert!((total.cull_rate() - 0.5).abs() < 1e-6);
    }
}
