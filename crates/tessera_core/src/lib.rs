//! # Tessera Core
//!
//! Frame memory and addressing for per-frame command stream construction:
//! - A dual-ended arena that every transient graphics allocation comes from
//! - Physical and segmented addresses as seen by the command consumer
//! - The segment table and its write-before-execute contract
//! - Frame layout configuration
//!
//! ## Architecture Rules
//!
//! 1. **One arena per frame pool** - reset once per frame, never grown
//! 2. **Offsets, not pointers** - allocations are spans into the arena
//! 3. **Fatal means fatal** - exhaustion is reported, never truncated
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{FrameArena, PhysAddr};
//!
//! let mut arena = FrameArena::new(PhysAddr(0x0010_0000), 0x4_0000);
//! let viewport = arena.alloc_head(16)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod address;
pub mod config;
pub mod error;
pub mod memory;
pub mod segment;

pub use address::{PhysAddr, SegAddr, SegmentId, PHYS_ADDR_LIMIT, SEGMENT_COUNT};
pub use config::{FrameConfig, COMMAND_SIZE, TERMINATOR_RECORDS};
pub use error::{CoreError, CoreResult};
pub use memory::{align_up, FrameArena, Span, ARENA_ALIGN};
pub use segment::{SegmentTable, MAX_STREAMS};
