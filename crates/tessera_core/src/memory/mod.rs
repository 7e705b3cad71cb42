//! # Memory Management
//!
//! One fixed arena per frame pool, carved from both ends.
//!
//! ## Design Philosophy
//!
//! All memory is allocated once at startup. During frame construction:
//! - No heap allocations
//! - No per-object bookkeeping
//! - Everything is released at once by the next reset

mod arena;

pub use arena::{align_up, FrameArena, Span, ARENA_ALIGN};
