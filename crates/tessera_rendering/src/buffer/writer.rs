//! Scoped writer over one open buffer.

use tessera_core::{PhysAddr, SegAddr, SegmentId};

use super::{BufferKind, Cursor};
use crate::command::{Command, Vertex, Viewport, MAX_VERTEX_LOAD};
use crate::culling::Mat4;
use crate::error::{RenderError, RenderResult};
use crate::frame::Frame;

const SCREEN_COORD_LIMIT: u16 = 0x1000;

/// Appends commands to one buffer of a [`Frame`].
///
/// The buffer is closed when the writer is dropped, so every open has a
/// matching close even on early return. Use [`BufferWriter::close`] to see
/// the close result directly; otherwise a failed close is reported when the
/// frame is finished.
///
/// Segment writes go through the frame's segment table, recorded against
/// this buffer's chain position. With segment validation enabled, every
/// segmented reference is checked against what has been set so far.
pub struct BufferWriter<'f> {
    frame: &'f mut Frame,
    cursor: Cursor,
    closed: bool,
}

impl<'f> BufferWriter<'f> {
    pub(crate) fn new(frame: &'f mut Frame, cursor: Cursor) -> Self {
        Self {
            frame,
            cursor,
            closed: false,
        }
    }

    /// Buffer being written.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.cursor.kind()
    }

    /// Records in the buffer so far.
    #[inline]
    #[must_use]
    pub const fn records(&self) -> usize {
        self.cursor.records()
    }

    /// Records that still fit.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Frame this writer belongs to.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &*self.frame
    }

    /// Appends one command.
    ///
    /// # Errors
    ///
    /// - [`RenderError::BufferOverflow`] if the buffer is full
    /// - [`RenderError::Core`] with a segment error if validation is on and
    ///   the command references a segment not yet set in chain order
    pub fn push(&mut self, cmd: Command) -> RenderResult<()> {
        let stream = self.cursor.kind().index();
        if self.frame.validates_segments() {
            if let Some(addr) = cmd.reference() {
                self.frame.segments().check_visible(addr, stream)?;
            }
        }

        let (arena, segments) = self.frame.arena_and_segments();
        self.cursor.append(arena, cmd)?;
        if let Command::SetSegment { id, base } = cmd {
            segments.set(id, base, stream)?;
        }
        Ok(())
    }

    /// Maps `id` to `base` for everything executed after this point.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn set_segment(&mut self, id: SegmentId, base: PhysAddr) -> RenderResult<()> {
        self.push(Command::SetSegment { id, base })
    }

    /// Calls a prebuilt list.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn call_list(&mut self, addr: SegAddr) -> RenderResult<()> {
        self.push(Command::CallList { addr })
    }

    /// Copies `matrix` into the arena and applies it.
    ///
    /// # Errors
    ///
    /// Arena exhaustion, or as [`BufferWriter::push`].
    pub fn matrix(&mut self, matrix: &Mat4, flags: u8) -> RenderResult<()> {
        let addr = self.frame.alloc_pod(matrix)?;
        self.push(Command::Matrix { addr: addr.segmented(), flags })
    }

    /// Pops `count` modelview matrices.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn pop_matrix(&mut self, count: u8) -> RenderResult<()> {
        self.push(Command::PopMatrix { count })
    }

    /// Copies `viewport` into the arena and loads it.
    ///
    /// # Errors
    ///
    /// Arena exhaustion, or as [`BufferWriter::push`].
    pub fn viewport(&mut self, viewport: &Viewport) -> RenderResult<()> {
        let addr = self.frame.alloc_pod(viewport)?;
        self.push(Command::Viewport { addr: addr.segmented() })
    }

    /// Copies `vertices` into the arena and loads them into cache slots
    /// starting at `dest`.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidCommand`] for an empty or oversized load,
    /// arena exhaustion, or as [`BufferWriter::push`].
    pub fn vertices(&mut self, vertices: &[Vertex], dest: u8) -> RenderResult<()> {
        let count = u8::try_from(vertices.len())
            .ok()
            .filter(|&n| n > 0 && u16::from(n) + u16::from(dest) <= u16::from(MAX_VERTEX_LOAD))
            .ok_or_else(|| {
                RenderError::InvalidCommand(format!(
                    "vertex load of {} at slot {dest} exceeds the {MAX_VERTEX_LOAD}-entry cache",
                    vertices.len()
                ))
            })?;
        let addr = self.frame.alloc_slice(vertices)?;
        self.push(Command::Vertex { addr: addr.segmented(), count, dest })
    }

    /// Draws one triangle from cache slots.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidCommand`] if a slot is outside the cache, or as
    /// [`BufferWriter::push`].
    pub fn triangle(&mut self, a: u8, b: u8, c: u8) -> RenderResult<()> {
        if [a, b, c].iter().any(|&v| v >= MAX_VERTEX_LOAD) {
            return Err(RenderError::InvalidCommand(format!("triangle ({a}, {b}, {c}) outside vertex cache")));
        }
        self.push(Command::Triangle { v: [a, b, c] })
    }

    /// Sets the primitive color.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn prim_color(&mut self, rgba: u32) -> RenderResult<()> {
        self.push(Command::SetPrimColor { rgba })
    }

    /// Fills a screen rectangle with the primitive color.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidCommand`] for an inverted or off-range
    /// rectangle, or as [`BufferWriter::push`].
    pub fn fill_rect(&mut self, ulx: u16, uly: u16, lrx: u16, lry: u16) -> RenderResult<()> {
        if ulx > lrx || uly > lry || lrx >= SCREEN_COORD_LIMIT || lry >= SCREEN_COORD_LIMIT {
            return Err(RenderError::InvalidCommand(format!(
                "rectangle ({ulx},{uly})-({lrx},{lry}) is inverted or off screen"
            )));
        }
        self.push(Command::FillRect { ulx, uly, lrx, lry })
    }

    /// Draws a background image.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn background(&mut self, addr: SegAddr) -> RenderResult<()> {
        self.push(Command::Background { addr })
    }

    /// Pipeline sync.
    ///
    /// # Errors
    ///
    /// As [`BufferWriter::push`].
    pub fn pipe_sync(&mut self) -> RenderResult<()> {
        self.push(Command::PipeSync)
    }

    /// Closes the buffer now and reports the result.
    ///
    /// # Errors
    ///
    /// As [`crate::buffer::BufferSet::close`].
    pub fn close(mut self) -> RenderResult<()> {
        self.closed = true;
        self.frame.close_buffer(self.cursor)
    }
}

impl Drop for BufferWriter<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.frame.close_buffer(self.cursor) {
            self.frame.defer_error(err);
        }
    }
}
