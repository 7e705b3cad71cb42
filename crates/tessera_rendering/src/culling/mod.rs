//! # Visibility
//!
//! Per-frame frustum culling of static geometry groups into a depth-ordered
//! list, and emission of that list into the Opaque and Translucent buffers.
//!
//! ```text
//!  groups ──▶ view transform ──▶ frustum test ──▶ depth list (near → far)
//!                                                     │
//!                         Opaque ◀── front to back ───┤
//!                    Translucent ◀── back to front ───┘
//! ```

mod depth_list;
mod engine;
mod frustum;
mod projection;

pub use depth_list::{CullEntry, DepthIter, DepthList};
pub use engine::{BoundingSphere, DrawPhases, GeometryGroup, VisibilityEngine};
pub use frustum::{Frustum, Plane};
pub use projection::{look_at, mat4_mul, perspective, transform_point, Mat4, IDENTITY};
