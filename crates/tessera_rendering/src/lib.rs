//! # Tessera Rendering
//!
//! Builds one command stream per frame and hands it to an asynchronous
//! command consumer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PRODUCER THREAD                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  FrameScheduler::begin_frame ──▶ Frame (arena, segments, buffers)│
//! │        │                                                         │
//! │        ├── RoomShape / VisibilityEngine ──▶ Opaque, Translucent  │
//! │        ├── DrawRoutine ... ──▶ any buffer                        │
//! │        ▼                                                         │
//! │  submit_frame ──▶ chain ──▶ TaskDescriptor                       │
//! └────────┬─────────────────────────────────────────────────────────┘
//!          │ depth-1 handoff (task + arena)
//!          ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  CONSUMER THREAD: TaskConsumer::execute ──▶ completion           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Every buffer write happens inside an open/close bracket
//! - A frame's memory is never touched by the producer while in flight
//! - Overflow, exhaustion and consumer faults end the frame with an error

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod command;
pub mod culling;
pub mod error;
pub mod frame;
pub mod room;
pub mod scheduler;
pub mod stats;
pub mod submit;
pub mod task;

pub use buffer::{walk_chain, BufferKind, BufferSet, BufferWriter, ChainSegment, CommandBuffer, Cursor};
pub use command::{Command, RawCommand, Vertex, Viewport};
pub use culling::{BoundingSphere, DrawPhases, GeometryGroup, Mat4, VisibilityEngine};
pub use error::{ConsumerFault, RenderError, RenderResult};
pub use frame::{FinishedFrame, Frame};
pub use room::{DrawPair, ImageShape, RoomShape};
pub use scheduler::{DrawRoutine, FrameScheduler};
pub use stats::{BufferUsage, CullStats, FrameStats};
pub use submit::{
    disassemble, CommandInterpreter, Completed, ExecutionSummary, ExecutionTrace, FaultHandler, FaultReport,
    SubmitRejected, TaskConsumer, TaskSubmitter,
};
pub use task::{ProgramRef, Region, TaskDescriptor};
