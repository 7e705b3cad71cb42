//! Culling geometry groups and emitting the visible ones.

use tessera_core::SegAddr;

use super::depth_list::{CullEntry, DepthList};
use super::frustum::Frustum;
use super::projection::{transform_point, Mat4, IDENTITY};
use crate::buffer::BufferKind;
use crate::error::RenderResult;
use crate::frame::Frame;
use crate::stats::CullStats;

/// Sphere bounding a group in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingSphere {
    /// Center.
    pub center: [f32; 3],
    /// Radius.
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a sphere.
    #[must_use]
    pub const fn new(center: [f32; 3], radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Static geometry with a bounding volume and prebuilt lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryGroup {
    /// World-space bounds.
    pub bounds: BoundingSphere,
    /// Opaque list.
    pub opaque: Option<SegAddr>,
    /// Translucent list.
    pub translucent: Option<SegAddr>,
}

/// Which passes a draw call emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawPhases {
    /// Emit opaque lists.
    pub opaque: bool,
    /// Emit translucent lists.
    pub translucent: bool,
}

impl DrawPhases {
    /// Both passes.
    pub const ALL: Self = Self { opaque: true, translucent: true };
    /// Opaque pass only.
    pub const OPAQUE: Self = Self { opaque: true, translucent: false };
    /// Translucent pass only.
    pub const TRANSLUCENT: Self = Self { opaque: false, translucent: true };
}

impl Default for DrawPhases {
    fn default() -> Self {
        Self::ALL
    }
}

/// Per-frame visibility pass.
///
/// ## Usage
///
/// ```rust,ignore
/// engine.set_camera(&view, &projection);
/// engine.cull(&groups, &mut frame);
/// engine.emit(&mut frame, DrawPhases::ALL)?;
/// ```
pub struct VisibilityEngine {
    view: Mat4,
    frustum: Frustum,
    list: DepthList,
    back_to_front: Vec<SegAddr>,
    last: CullStats,
}

impl VisibilityEngine {
    /// Creates an engine whose depth list holds `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the 16-bit link index.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            view: IDENTITY,
            frustum: Frustum::default(),
            list: DepthList::new(capacity),
            back_to_front: Vec::with_capacity(capacity),
            last: CullStats::default(),
        }
    }

    /// Sets the camera for the next cull.
    ///
    /// Groups are transformed into view space by `view` and tested against
    /// the planes of `projection`.
    pub fn set_camera(&mut self, view: &Mat4, projection: &Mat4) {
        self.view = *view;
        self.frustum = Frustum::from_matrix(projection);
    }

    /// Current frustum, in view space.
    #[inline]
    #[must_use]
    pub const fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Rebuilds the depth list from `groups` and records the counters on
    /// `frame`.
    ///
    /// Groups outside the frustum are skipped. When more groups are visible
    /// than the list holds, the extra ones are dropped with a warning.
    pub fn cull(&mut self, groups: &[GeometryGroup], frame: &mut Frame) -> &DepthList {
        self.list.clear();
        let mut stats = CullStats::default();

        for (index, group) in groups.iter().enumerate() {
            stats.tested += 1;
            let center = transform_point(&self.view, group.bounds.center);
            if !self.frustum.test_sphere(center, group.bounds.radius) {
                stats.culled += 1;
                continue;
            }

            let entry = CullEntry::new(index, group.bounds, -center[2], group.opaque, group.translucent);
            if self.list.insert(entry) {
                stats.visible += 1;
            } else {
                stats.dropped += 1;
            }
        }

        if stats.dropped > 0 {
            tracing::warn!(
                frame = frame.number(),
                dropped = stats.dropped,
                capacity = self.list.capacity(),
                "depth list full, visible groups dropped"
            );
        }
        tracing::trace!(
            frame = frame.number(),
            visible = stats.visible,
            culled = stats.culled,
            "groups culled"
        );

        frame.record_culling(&stats);
        self.last = stats;
        &self.list
    }

    /// Depth list from the last cull.
    #[inline]
    #[must_use]
    pub const fn list(&self) -> &DepthList {
        &self.list
    }

    /// Counters from the last cull.
    #[inline]
    #[must_use]
    pub const fn last_stats(&self) -> &CullStats {
        &self.last
    }

    /// Emits the depth list.
    ///
    /// Opaque lists go into the Opaque buffer nearest first; translucent
    /// lists go into the Translucent buffer farthest first.
    ///
    /// # Errors
    ///
    /// Any error from appending.
    pub fn emit(&mut self, frame: &mut Frame, phases: DrawPhases) -> RenderResult<()> {
        if phases.opaque {
            let mut out = frame.open(BufferKind::Opaque)?;
            for addr in self.list.iter().filter_map(|e| e.opaque) {
                out.call_list(addr)?;
            }
        }

        if phases.translucent {
            self.back_to_front.clear();
            self.back_to_front
                .extend(self.list.iter().filter_map(|e| e.translucent));
            let mut out = frame.open(BufferKind::Translucent)?;
            for &addr in self.back_to_front.iter().rev() {
                out.call_list(addr)?;
            }
        }
        Ok(())
    }
}

impl Default for VisibilityEngine {
    fn default() -> Self {
        Self::new(64)
    }
}
