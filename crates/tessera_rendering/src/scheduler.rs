//! # Frame Scheduler
//!
//! Drives the per-frame cycle on the producer thread:
//!
//! ```text
//!  begin_frame ──▶ DrawRoutine::draw ... ──▶ submit_frame
//!       ▲                                        │
//!       └──────── idle pools ◀── completions ◀───┘
//! ```
//!
//! With two arena pools the producer builds frame N+1 while the consumer
//! executes frame N. Submitting N+1 waits for N's completion, so a pool is
//! never reset while the consumer still reads it.

use std::time::Duration;

use tessera_core::{FrameArena, FrameConfig, SegmentTable};

use crate::error::{RenderError, RenderResult};
use crate::frame::Frame;
use crate::stats::FrameStats;
use crate::submit::{Completed, FaultHandler, TaskConsumer, TaskSubmitter};
use crate::task::{ProgramRef, TaskDescriptor};

/// Anything that draws into a frame.
pub trait DrawRoutine {
    /// Appends this routine's commands.
    ///
    /// # Errors
    ///
    /// Any error from the frame; it ends the frame.
    fn draw(&mut self, frame: &mut Frame) -> RenderResult<()>;
}

impl<F> DrawRoutine for F
where
    F: FnMut(&mut Frame) -> RenderResult<()>,
{
    fn draw(&mut self, frame: &mut Frame) -> RenderResult<()> {
        self(frame)
    }
}

/// Producer-side frame loop state.
pub struct FrameScheduler {
    config: FrameConfig,
    program: ProgramRef,
    idle: Vec<FrameArena>,
    segments: SegmentTable,
    submitter: TaskSubmitter,
    next_frame: u64,
    building: Option<u64>,
    last_stats: Option<FrameStats>,
}

impl FrameScheduler {
    /// Validates `config`, allocates the arena pools and starts the
    /// consumer.
    ///
    /// # Errors
    ///
    /// Configuration errors, or [`RenderError::ConsumerSpawn`].
    pub fn new(config: FrameConfig, program: ProgramRef, consumer: Box<dyn TaskConsumer>) -> RenderResult<Self> {
        Self::build(config, program, consumer, None)
    }

    /// As [`FrameScheduler::new`], with a fault handler run on the consumer
    /// thread.
    ///
    /// # Errors
    ///
    /// As [`FrameScheduler::new`].
    pub fn with_fault_handler(
        config: FrameConfig,
        program: ProgramRef,
        consumer: Box<dyn TaskConsumer>,
        on_fault: FaultHandler,
    ) -> RenderResult<Self> {
        Self::build(config, program, consumer, Some(on_fault))
    }

    fn build(
        config: FrameConfig,
        program: ProgramRef,
        consumer: Box<dyn TaskConsumer>,
        on_fault: Option<FaultHandler>,
    ) -> RenderResult<Self> {
        config.validate()?;
        let idle: Vec<FrameArena> = config
            .pool_bases()
            .into_iter()
            .map(|base| FrameArena::new(base, config.arena_size as usize))
            .collect();
        let timeout = Duration::from_millis(config.consumer_timeout_ms);
        let submitter = TaskSubmitter::spawn_with_handler(consumer, timeout, on_fault)?;

        tracing::info!(
            pools = idle.len(),
            arena_size = config.arena_size,
            program = program.name,
            "frame scheduler started"
        );

        Ok(Self {
            config,
            program,
            idle,
            segments: SegmentTable::new(),
            submitter,
            next_frame: 0,
            building: None,
            last_stats: None,
        })
    }

    /// Configuration in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Number of the next frame to begin.
    #[inline]
    #[must_use]
    pub const fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Pools not currently building or executing.
    #[inline]
    #[must_use]
    pub fn idle_pools(&self) -> usize {
        self.idle.len()
    }

    /// Statistics of the last submitted frame.
    #[inline]
    #[must_use]
    pub const fn last_stats(&self) -> Option<&FrameStats> {
        self.last_stats.as_ref()
    }

    /// The submitter, for inspection.
    #[inline]
    #[must_use]
    pub const fn submitter(&self) -> &TaskSubmitter {
        &self.submitter
    }

    /// Starts the next frame in an idle pool.
    ///
    /// When no pool is idle this waits for the task in flight to complete.
    ///
    /// # Errors
    ///
    /// - [`RenderError::FrameInProgress`] if the previous frame was not submitted
    /// - [`RenderError::NoIdlePool`] if every pool was lost to an earlier failure
    /// - any consumer error collected while recycling, or from [`Frame::begin`]
    pub fn begin_frame(&mut self) -> RenderResult<Frame> {
        if let Some(number) = self.building {
            return Err(RenderError::FrameInProgress(number));
        }
        while let Some(done) = self.submitter.poll()? {
            self.recycle(done);
        }
        let arena = match self.idle.pop() {
            Some(arena) => arena,
            None => {
                let done = self.submitter.wait()?.ok_or(RenderError::NoIdlePool)?;
                done.memory
            }
        };

        let number = self.next_frame;
        let segments = std::mem::take(&mut self.segments);
        let frame = Frame::begin(number, arena, segments, &self.config)?;
        self.building = Some(number);
        self.next_frame += 1;
        Ok(frame)
    }

    /// Chains `frame`, builds its task and submits it, waiting for the
    /// previous task first.
    ///
    /// # Errors
    ///
    /// Any error from finishing the frame or from submission. A frame that
    /// fails to finish is dropped with its pool, and the next
    /// [`FrameScheduler::begin_frame`] starts from a fresh segment table.
    pub fn submit_frame(&mut self, frame: Frame) -> RenderResult<TaskDescriptor> {
        let number = frame.number();
        self.building = None;
        let finished = frame.finish(&self.program).map_err(|err| {
            tracing::error!(frame = number, error = %err, "frame dropped before submission");
            err
        })?;
        self.segments = finished.segments;

        let stats = finished.stats;
        tracing::debug!(
            frame = stats.frame,
            work = stats.buffers[0].records,
            opaque = stats.buffers[1].records,
            translucent = stats.buffers[2].records,
            overlay = stats.buffers[3].records,
            arena_head = stats.arena_head,
            arena_tail = stats.arena_tail,
            visible = stats.culling.visible,
            culled = stats.culling.culled,
            build_ms = stats.build_time_ms,
            "frame built"
        );
        self.last_stats = Some(stats);

        let task = finished.task;
        if let Some(done) = self.submitter.submit(task, finished.arena)? {
            self.recycle(done);
        }
        Ok(task)
    }

    /// Begins a frame, runs every routine in order, and submits it.
    ///
    /// # Errors
    ///
    /// The first error from any step. A frame whose routine fails is
    /// abandoned and its pool returned.
    pub fn run_frame(&mut self, routines: &mut [&mut dyn DrawRoutine]) -> RenderResult<TaskDescriptor> {
        let mut frame = self.begin_frame()?;
        for routine in routines.iter_mut() {
            if let Err(err) = routine.draw(&mut frame) {
                self.abandon_frame(frame);
                return Err(err);
            }
        }
        self.submit_frame(frame)
    }

    /// Discards a frame without submitting it.
    ///
    /// Its pool goes back to the idle set and its segment table is kept, so
    /// the next frame can begin.
    pub fn abandon_frame(&mut self, frame: Frame) {
        tracing::warn!(frame = frame.number(), "frame abandoned");
        let (arena, segments) = frame.into_parts();
        self.segments = segments;
        self.idle.push(arena);
        self.building = None;
    }

    /// Waits for the task in flight and returns its pool to the idle set.
    ///
    /// # Errors
    ///
    /// Any consumer error.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        if let Some(done) = self.submitter.wait()? {
            self.recycle(done);
        }
        Ok(())
    }

    fn recycle(&mut self, done: Completed) {
        tracing::trace!(frame = done.task.frame(), commands = done.summary.commands, "pool recycled");
        self.idle.push(done.memory);
    }
}
