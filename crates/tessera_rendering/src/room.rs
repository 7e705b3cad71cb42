//! # Room Shapes
//!
//! The three ways static room geometry is drawn. Dispatch is a single
//! `match`; there is no per-shape trait object.
//!
//! | Shape      | Opaque                              | Translucent            |
//! |------------|-------------------------------------|------------------------|
//! | `Normal`   | pairs in authoring order            | pairs in authoring order |
//! | `Image`    | background, then pairs              | pairs in authoring order |
//! | `Cullable` | visible groups, near to far         | visible groups, far to near |

use tessera_core::SegAddr;

use crate::buffer::BufferKind;
use crate::culling::{DrawPhases, GeometryGroup, VisibilityEngine};
use crate::error::RenderResult;
use crate::frame::Frame;

/// An opaque and a translucent list drawn together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawPair {
    /// Opaque list.
    pub opaque: Option<SegAddr>,
    /// Translucent list.
    pub translucent: Option<SegAddr>,
}

/// A prerendered background plus ordinary geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageShape {
    /// Background image descriptor.
    pub background: SegAddr,
    /// Geometry drawn over it.
    pub pairs: Vec<DrawPair>,
}

/// Static geometry of one room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomShape {
    /// Always drawn, in authoring order.
    Normal(Vec<DrawPair>),
    /// Background image first, then pairs.
    Image(ImageShape),
    /// Frustum-culled and depth-sorted.
    Cullable(Vec<GeometryGroup>),
}

impl RoomShape {
    /// Emits the room into `frame`.
    ///
    /// `engine` is only used by [`RoomShape::Cullable`] and must already
    /// have the frame's camera.
    ///
    /// # Errors
    ///
    /// Any error from appending.
    pub fn draw(&self, frame: &mut Frame, engine: &mut VisibilityEngine, phases: DrawPhases) -> RenderResult<()> {
        match self {
            Self::Normal(pairs) => draw_pairs(frame, pairs, phases),
            Self::Image(image) => {
                if phases.opaque {
                    frame.open(BufferKind::Opaque)?.background(image.background)?;
                }
                draw_pairs(frame, &image.pairs, phases)
            }
            Self::Cullable(groups) => {
                engine.cull(groups, frame);
                engine.emit(frame, phases)
            }
        }
    }

    /// Number of drawable entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Normal(pairs) => pairs.len(),
            Self::Image(image) => image.pairs.len() + 1,
            Self::Cullable(groups) => groups.len(),
        }
    }

    /// Returns true if the room draws nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn draw_pairs(frame: &mut Frame, pairs: &[DrawPair], phases: DrawPhases) -> RenderResult<()> {
    if phases.opaque {
        let mut out = frame.open(BufferKind::Opaque)?;
        for addr in pairs.iter().filter_map(|p| p.opaque) {
            out.call_list(addr)?;
        }
    }
    if phases.translucent {
        let mut out = frame.open(BufferKind::Translucent)?;
        for addr in pairs.iter().filter_map(|p| p.translucent) {
            out.call_list(addr)?;
        }
    }
    Ok(())
}
