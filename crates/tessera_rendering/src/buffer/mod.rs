//! # Command Buffers
//!
//! Four fixed-capacity buffers carved from the frame arena, executed as one
//! chain:
//!
//! ```text
//!  Work ──branch──▶ Opaque ──branch──▶ Translucent ──branch──▶ Overlay ──▶ sync, sync, end
//! ```
//!
//! Work and Opaque come from the arena head, Translucent and Overlay from the
//! tail. Every buffer keeps [`TERMINATOR_RECORDS`] records back so chaining
//! can never overflow.
//!
//! Writing follows a strict open/append/close bracket: [`BufferSet::open`]
//! hands out a [`Cursor`], [`Cursor::append`] writes records, and
//! [`BufferSet::close`] commits the final position. Drawing code normally
//! goes through [`BufferWriter`], which closes on drop.

mod chain;
mod writer;

use std::fmt;

use tessera_core::{FrameArena, FrameConfig, PhysAddr, Span, TERMINATOR_RECORDS};

use crate::command::{Command, RECORD};
use crate::error::{RenderError, RenderResult};

pub use chain::{walk_chain, ChainSegment};
pub use writer::BufferWriter;

const RESERVE: usize = TERMINATOR_RECORDS as usize * RECORD;

/// The four chained buffers, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
    /// Frame setup: segment bases, color and depth images.
    Work,
    /// Opaque geometry, front to back.
    Opaque,
    /// Translucent geometry, back to front.
    Translucent,
    /// Screen-space overlays drawn last.
    Overlay,
}

impl BufferKind {
    /// All buffers in chain order.
    pub const CHAIN: [Self; 4] = [Self::Work, Self::Opaque, Self::Translucent, Self::Overlay];

    /// Position in the chain. Also the segment-tracking stream index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Buffer executed after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Work => Some(Self::Opaque),
            Self::Opaque => Some(Self::Translucent),
            Self::Translucent => Some(Self::Overlay),
            Self::Overlay => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Opaque => "opaque",
            Self::Translucent => "translucent",
            Self::Overlay => "overlay",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BufferState {
    Idle,
    Open,
    Sealed,
}

/// One buffer's region and committed cursor.
#[derive(Clone, Copy, Debug)]
pub struct CommandBuffer {
    kind: BufferKind,
    span: Span,
    cursor: usize,
    state: BufferState,
}

impl CommandBuffer {
    fn new(kind: BufferKind, span: Span) -> Self {
        Self {
            kind,
            span,
            cursor: span.offset,
            state: BufferState::Idle,
        }
    }

    /// Which buffer this is.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Arena region of the buffer.
    #[inline]
    #[must_use]
    pub const fn span(&self) -> Span {
        self.span
    }

    /// Arena offset of the first record.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> usize {
        self.span.offset
    }

    /// Committed cursor (arena offset of the next record).
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Last position a drawing routine may write up to.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.span.offset + self.span.len - RESERVE
    }

    /// Records committed so far.
    #[inline]
    #[must_use]
    pub const fn records(&self) -> usize {
        (self.cursor - self.span.offset) / RECORD
    }

    /// Records available to drawing routines.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        (self.span.len - RESERVE) / RECORD
    }

    /// Returns true once chained.
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state == BufferState::Sealed
    }

    /// Returns true while a cursor is out.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == BufferState::Open
    }
}

/// Write position inside an open buffer.
///
/// Only [`BufferSet::open`] creates cursors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    kind: BufferKind,
    start: usize,
    offset: usize,
    limit: usize,
}

impl Cursor {
    /// Buffer this cursor writes into.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Arena offset of the next record.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Records written into the buffer, including earlier brackets.
    #[inline]
    #[must_use]
    pub const fn records(&self) -> usize {
        (self.offset - self.start) / RECORD
    }

    /// Records that still fit.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        (self.limit - self.offset) / RECORD
    }

    /// Writes one record and advances.
    ///
    /// # Errors
    ///
    /// [`RenderError::BufferOverflow`] if the record would reach into the
    /// terminator reserve. Nothing is written in that case.
    pub fn append(&mut self, arena: &mut FrameArena, cmd: Command) -> RenderResult<()> {
        if self.offset + RECORD > self.limit {
            tracing::error!(buffer = %self.kind, records = self.records(), "command buffer overflow");
            return Err(RenderError::BufferOverflow {
                buffer: self.kind,
                capacity: (self.limit - self.start) / RECORD,
                requested: self.records(),
            });
        }
        self.write(arena, cmd);
        Ok(())
    }

    /// Writes into the reserve. Used by chaining only.
    fn write(&mut self, arena: &mut FrameArena, cmd: Command) {
        let raw = cmd.encode();
        arena
            .bytes_mut(Span { offset: self.offset, len: RECORD })
            .copy_from_slice(bytemuck::bytes_of(&raw));
        self.offset += RECORD;
    }
}

/// The four buffers of one frame.
#[derive(Clone, Debug)]
pub struct BufferSet {
    buffers: [CommandBuffer; 4],
    validate_bounds: bool,
    chained: bool,
}

impl BufferSet {
    /// Carves all four buffers from a freshly reset arena.
    ///
    /// # Errors
    ///
    /// [`RenderError::Core`] if the arena cannot hold them.
    pub fn carve(arena: &mut FrameArena, config: &FrameConfig) -> RenderResult<Self> {
        let size = |bytes: u32| bytes as usize;
        let work = arena.alloc_head(size(config.work_buffer_size))?;
        let opaque = arena.alloc_head(size(config.opaque_buffer_size))?;
        let translucent = arena.alloc_tail(size(config.translucent_buffer_size))?;
        let overlay = arena.alloc_tail(size(config.overlay_buffer_size))?;

        tracing::trace!(
            work = work.offset,
            opaque = opaque.offset,
            translucent = translucent.offset,
            overlay = overlay.offset,
            "command buffers carved"
        );

        Ok(Self {
            buffers: [
                CommandBuffer::new(BufferKind::Work, work),
                CommandBuffer::new(BufferKind::Opaque, opaque),
                CommandBuffer::new(BufferKind::Translucent, translucent),
                CommandBuffer::new(BufferKind::Overlay, overlay),
            ],
            validate_bounds: config.validate_bounds,
            chained: false,
        })
    }

    /// One buffer.
    #[inline]
    #[must_use]
    pub fn get(&self, kind: BufferKind) -> &CommandBuffer {
        &self.buffers[kind.index()]
    }

    /// All buffers in chain order.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &CommandBuffer> {
        self.buffers.iter()
    }

    /// Returns true once [`BufferSet::chain`] has run.
    #[inline]
    #[must_use]
    pub const fn is_chained(&self) -> bool {
        self.chained
    }

    /// Opens a buffer for appending.
    ///
    /// # Errors
    ///
    /// [`RenderError::BufferAlreadyOpen`] or [`RenderError::BufferSealed`].
    pub fn open(&mut self, kind: BufferKind) -> RenderResult<Cursor> {
        let buf = &mut self.buffers[kind.index()];
        match buf.state {
            BufferState::Open => return Err(RenderError::BufferAlreadyOpen(kind)),
            BufferState::Sealed => return Err(RenderError::BufferSealed(kind)),
            BufferState::Idle => {}
        }
        buf.state = BufferState::Open;
        Ok(Cursor {
            kind,
            start: buf.start(),
            offset: buf.cursor,
            limit: buf.limit(),
        })
    }

    /// Commits a cursor and closes its buffer.
    ///
    /// # Errors
    ///
    /// [`RenderError::CursorOutOfBounds`] when bounds validation is on and
    /// the cursor moved backwards, left the buffer, or is misaligned. The
    /// buffer is closed either way.
    pub fn close(&mut self, cursor: Cursor) -> RenderResult<()> {
        let buf = &mut self.buffers[cursor.kind.index()];
        if buf.state != BufferState::Open {
            return Err(RenderError::BufferSealed(cursor.kind));
        }
        buf.state = BufferState::Idle;

        let in_bounds = cursor.start == buf.start()
            && cursor.offset >= buf.cursor
            && cursor.offset <= buf.limit()
            && (cursor.offset - buf.start()) % RECORD == 0;
        if self.validate_bounds && !in_bounds {
            tracing::error!(buffer = %cursor.kind, cursor = cursor.offset, "cursor out of bounds on close");
            return Err(RenderError::CursorOutOfBounds {
                buffer: cursor.kind,
                cursor: cursor.offset,
                start: buf.start(),
                limit: buf.limit(),
            });
        }
        debug_assert!(in_bounds, "{} cursor {:#x} out of bounds", cursor.kind, cursor.offset);

        buf.cursor = cursor.offset;
        tracing::trace!(buffer = %cursor.kind, records = buf.records(), "buffer closed");
        Ok(())
    }

    /// Physical start address of a buffer.
    #[inline]
    #[must_use]
    pub fn start_addr(&self, arena: &FrameArena, kind: BufferKind) -> PhysAddr {
        arena.phys(self.get(kind).start())
    }

    /// Buffer that begins exactly at arena `offset`.
    #[must_use]
    pub fn kind_at(&self, offset: usize) -> Option<BufferKind> {
        self.buffers
            .iter()
            .find(|b| b.start() == offset)
            .map(CommandBuffer::kind)
    }
}
