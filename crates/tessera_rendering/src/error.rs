//! Error types for frame construction and submission.

use tessera_core::{CoreError, PhysAddr};
use thiserror::Error;

use crate::buffer::BufferKind;

/// Errors raised while building or submitting a frame.
///
/// Every variant is fatal for the frame it occurred in. Nothing here is
/// recovered by dropping commands or truncating a buffer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Arena, segment or configuration failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A write would have spilled into the buffer's terminator reserve.
    #[error("{buffer} buffer overflow: capacity {capacity} records, write at record {requested}")]
    BufferOverflow {
        /// Buffer that overflowed.
        buffer: BufferKind,
        /// Usable records (terminator reserve excluded).
        capacity: usize,
        /// Index of the record that did not fit.
        requested: usize,
    },

    /// The buffer already has an open writer.
    #[error("{0} buffer is already open")]
    BufferAlreadyOpen(BufferKind),

    /// The buffer was chained and accepts no more commands.
    #[error("{0} buffer is sealed")]
    BufferSealed(BufferKind),

    /// A close handed back a cursor that does not belong to the buffer.
    #[error("{buffer} buffer closed with cursor {cursor:#x} outside {start:#x}..={limit:#x}")]
    CursorOutOfBounds {
        /// Buffer being closed.
        buffer: BufferKind,
        /// Offending cursor (arena offset).
        cursor: usize,
        /// Buffer start (arena offset).
        start: usize,
        /// Last writable position (arena offset).
        limit: usize,
    },

    /// A command could not be built from the given arguments.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The chain could not be walked.
    #[error("broken chain at {at}: {reason}")]
    BrokenChain {
        /// Address being read.
        at: PhysAddr,
        /// What went wrong.
        reason: &'static str,
    },

    /// A previous task is still executing.
    #[error("task for frame {frame} is still in flight")]
    TaskInFlight {
        /// Frame of the in-flight task.
        frame: u64,
    },

    /// The consumer reported a fault while executing a task.
    #[error("consumer fault in frame {frame}: {fault}")]
    ConsumerFault {
        /// Frame of the faulting task.
        frame: u64,
        /// Fault reported by the consumer.
        fault: ConsumerFault,
    },

    /// No completion signal arrived in time.
    #[error("consumer hung on frame {frame} (no completion after {waited_ms}ms)")]
    ConsumerTimeout {
        /// Frame of the task being waited on.
        frame: u64,
        /// How long we waited.
        waited_ms: u64,
    },

    /// The consumer thread is gone.
    #[error("consumer disconnected")]
    ConsumerDisconnected,

    /// The consumer thread could not be started.
    #[error("failed to spawn consumer: {0}")]
    ConsumerSpawn(String),

    /// Every pool is gone: nothing idle and nothing in flight.
    #[error("no idle frame pool")]
    NoIdlePool,

    /// A frame is already being built.
    #[error("frame {0} is still being built")]
    FrameInProgress(u64),
}

/// Faults a command consumer can report for one task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerFault {
    /// The record at `addr` does not decode.
    #[error("malformed command {w0:#010x} {w1:#010x} at {addr}")]
    Malformed {
        /// Record address.
        addr: PhysAddr,
        /// First word.
        w0: u32,
        /// Second word.
        w1: u32,
    },

    /// A command referenced a segment that nothing set.
    #[error("segment {segment:#x} used before set at {addr}")]
    UnsetSegment {
        /// Address of the referencing command.
        addr: PhysAddr,
        /// Segment id.
        segment: u8,
    },

    /// Execution reached an address outside the task's memory.
    #[error("execution left task memory at {addr}")]
    AddressOutOfRange {
        /// Address that could not be read.
        addr: PhysAddr,
    },

    /// Nested calls exceeded the call stack.
    #[error("call stack overflow calling {addr}")]
    CallStackOverflow {
        /// Target of the call that did not fit.
        addr: PhysAddr,
    },

    /// The watchdog fired before the stream ended.
    #[error("stream did not end within {executed} commands")]
    Stalled {
        /// Commands executed before giving up.
        executed: u32,
    },
}

/// Result alias for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
