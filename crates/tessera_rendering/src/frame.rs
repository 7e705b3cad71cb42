//! # Frame Context
//!
//! One [`Frame`] is built per displayed frame and handed to every drawing
//! routine. It owns the frame's arena while the frame is being built, the
//! segment table, and the four command buffers.
//!
//! ```text
//!  begin ──▶ prologue into Work ──▶ drawing routines ──▶ finish (chain + task)
//! ```
//!
//! The Work buffer starts with a fixed prologue: the identity, arena and
//! framebuffer segments, followed by the color and depth images.

use std::time::Instant;

use bytemuck::Pod;
use tessera_core::{FrameArena, FrameConfig, PhysAddr, SegAddr, SegmentId, SegmentTable, Span};

use crate::buffer::{BufferKind, BufferSet, BufferWriter, Cursor};
use crate::command::Command;
use crate::error::{RenderError, RenderResult};
use crate::stats::{BufferUsage, CullStats, FrameStats};
use crate::task::{ProgramRef, Region, TaskDescriptor};

/// Records written into Work before any drawing routine runs.
pub const PROLOGUE_RECORDS: usize = 6;

/// Per-frame construction context.
pub struct Frame {
    number: u64,
    arena: FrameArena,
    segments: SegmentTable,
    buffers: BufferSet,
    scratch: Span,
    output: Span,
    framebuffer: PhysAddr,
    depth_buffer: PhysAddr,
    validate_segments: bool,
    deferred: Option<RenderError>,
    culling: CullStats,
    started: Instant,
}

/// A chained frame, ready for submission.
#[derive(Debug)]
pub struct FinishedFrame {
    /// Descriptor to submit.
    pub task: TaskDescriptor,
    /// Memory the task executes from.
    pub arena: FrameArena,
    /// Segment table, returned for the next frame.
    pub segments: SegmentTable,
    /// Buffer layout, for walking the chain.
    pub buffers: BufferSet,
    /// Build statistics.
    pub stats: FrameStats,
}

impl Frame {
    /// Starts frame `number` in `arena`.
    ///
    /// Resets the arena and the segment set tracking, carves the buffers and
    /// task regions, and writes the Work prologue.
    ///
    /// # Errors
    ///
    /// Any error from carving or from the prologue. The arena must be sized
    /// for the configured layout.
    pub fn begin(
        number: u64,
        mut arena: FrameArena,
        mut segments: SegmentTable,
        config: &FrameConfig,
    ) -> RenderResult<Self> {
        arena.reset();
        segments.begin_frame(number);

        let buffers = BufferSet::carve(&mut arena, config)?;
        let scratch = arena.alloc_head(config.task_scratch_size as usize)?;
        let output = arena.alloc_head(config.task_output_size as usize)?;

        let mut frame = Self {
            number,
            arena,
            segments,
            buffers,
            scratch,
            output,
            framebuffer: config.framebuffer_for(number),
            depth_buffer: PhysAddr(config.depth_buffer),
            validate_segments: config.validate_segments,
            deferred: None,
            culling: CullStats::default(),
            started: Instant::now(),
        };
        frame.write_prologue()?;

        tracing::debug!(
            frame = number,
            framebuffer = %frame.framebuffer,
            arena = %frame.arena.base(),
            "frame begun"
        );
        Ok(frame)
    }

    fn write_prologue(&mut self) -> RenderResult<()> {
        let arena_base = self.arena.base();
        let framebuffer = self.framebuffer;
        let depth = self.depth_buffer;

        let mut work = self.open(BufferKind::Work)?;
        work.set_segment(SegmentId::PHYSICAL, PhysAddr(0))?;
        work.set_segment(SegmentId::WORK, arena_base)?;
        work.set_segment(SegmentId::FRAMEBUFFER, framebuffer)?;
        work.push(Command::SetColorImage {
            addr: SegAddr::new(SegmentId::FRAMEBUFFER, 0),
        })?;
        work.push(Command::SetDepthImage { addr: depth.segmented() })?;
        work.pipe_sync()?;
        work.close()
    }

    /// Frame number.
    #[inline]
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Framebuffer this frame renders into.
    #[inline]
    #[must_use]
    pub const fn framebuffer(&self) -> PhysAddr {
        self.framebuffer
    }

    /// The frame's arena.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> &FrameArena {
        &self.arena
    }

    /// The segment table as the producer sees it.
    #[inline]
    #[must_use]
    pub const fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    /// Buffer layout and cursors.
    #[inline]
    #[must_use]
    pub const fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    /// Returns true if segment references are validated on append.
    #[inline]
    #[must_use]
    pub const fn validates_segments(&self) -> bool {
        self.validate_segments
    }

    /// Visibility counters recorded so far.
    #[inline]
    #[must_use]
    pub const fn culling(&self) -> &CullStats {
        &self.culling
    }

    /// Allocates `size` bytes from the arena head.
    ///
    /// # Errors
    ///
    /// [`RenderError::Core`] on exhaustion.
    pub fn alloc(&mut self, size: usize) -> RenderResult<Span> {
        Ok(self.arena.alloc_head(size)?)
    }

    /// Allocates `size` bytes from the arena tail.
    ///
    /// # Errors
    ///
    /// [`RenderError::Core`] on exhaustion.
    pub fn alloc_tail(&mut self, size: usize) -> RenderResult<Span> {
        Ok(self.arena.alloc_tail(size)?)
    }

    /// Copies `value` to the arena head and returns its physical address.
    ///
    /// # Errors
    ///
    /// [`RenderError::Core`] on exhaustion.
    pub fn alloc_pod<T: Pod>(&mut self, value: &T) -> RenderResult<PhysAddr> {
        let span = self.arena.alloc_head_pod(value)?;
        Ok(self.arena.phys(span.offset))
    }

    /// Copies `values` to the arena head and returns the physical address of
    /// the first one.
    ///
    /// # Errors
    ///
    /// [`RenderError::Core`] on exhaustion.
    pub fn alloc_slice<T: Pod>(&mut self, values: &[T]) -> RenderResult<PhysAddr> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let span = self.arena.alloc_head(bytes.len())?;
        self.arena.bytes_mut(span)[..bytes.len()].copy_from_slice(bytes);
        Ok(self.arena.phys(span.offset))
    }

    /// Mutable bytes of a span allocated this frame.
    ///
    /// # Panics
    ///
    /// Panics if the span does not lie within the arena.
    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        self.arena.bytes_mut(span)
    }

    /// Physical address of a span allocated this frame.
    #[inline]
    #[must_use]
    pub fn phys(&self, span: Span) -> PhysAddr {
        self.arena.phys(span.offset)
    }

    /// Opens a buffer for writing.
    ///
    /// # Errors
    ///
    /// [`RenderError::BufferSealed`] once the frame is chained.
    pub fn open(&mut self, kind: BufferKind) -> RenderResult<BufferWriter<'_>> {
        let cursor = self.buffers.open(kind)?;
        Ok(BufferWriter::new(self, cursor))
    }

    /// Adds visibility counters from one cull.
    pub fn record_culling(&mut self, stats: &CullStats) {
        self.culling.merge(stats);
    }

    #[cfg(test)]
    pub(crate) fn set_validate_segments(&mut self, on: bool) {
        self.validate_segments = on;
    }

    pub(crate) fn arena_and_segments(&mut self) -> (&mut FrameArena, &mut SegmentTable) {
        (&mut self.arena, &mut self.segments)
    }

    pub(crate) fn close_buffer(&mut self, cursor: Cursor) -> RenderResult<()> {
        self.buffers.close(cursor)
    }

    /// Gives back the arena and segment table of an abandoned frame.
    pub(crate) fn into_parts(self) -> (FrameArena, SegmentTable) {
        (self.arena, self.segments)
    }

    pub(crate) fn defer_error(&mut self, err: RenderError) {
        tracing::error!(frame = self.number, error = %err, "buffer close failed");
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }

    /// Chains the buffers and builds the task descriptor.
    ///
    /// # Errors
    ///
    /// The first error deferred from a dropped writer, or any chaining
    /// error. The frame is consumed either way.
    pub fn finish(mut self, program: &ProgramRef) -> RenderResult<FinishedFrame> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        // Counted before chaining so terminators are not reported as records.
        let stats = self.collect_stats();
        self.buffers.chain(&mut self.arena)?;

        let (entry, len) = self.buffers.work_extent(&self.arena);
        let task = TaskDescriptor::build(
            self.number,
            *program,
            Region { addr: entry, size: len },
            Region::of(&self.arena, self.scratch),
            Region::of(&self.arena, self.output),
            self.framebuffer,
        );

        tracing::debug!(
            frame = self.number,
            records = stats.total_records(),
            arena_free = stats.arena_free,
            "frame chained"
        );
        if stats.near_capacity() {
            tracing::warn!(frame = self.number, "a command buffer is above 90% of capacity");
        }

        Ok(FinishedFrame {
            task,
            arena: self.arena,
            segments: self.segments,
            buffers: self.buffers,
            stats,
        })
    }

    fn collect_stats(&self) -> FrameStats {
        let mut buffers = [BufferUsage::default(); 4];
        for buf in self.buffers.iter() {
            buffers[buf.kind().index()] = BufferUsage {
                records: buf.records(),
                capacity: buf.capacity(),
            };
        }
        FrameStats {
            frame: self.number,
            buffers,
            arena_head: self.arena.head_used(),
            arena_tail: self.arena.tail_used(),
            arena_free: self.arena.free(),
            culling: self.culling,
            build_time_ms: self.started.elapsed().as_secs_f32() * 1000.0,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.number)
            .field("framebuffer", &self.framebuffer)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}
