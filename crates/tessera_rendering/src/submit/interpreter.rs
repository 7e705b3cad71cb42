//! Reference consumer that executes a task's command stream on the CPU.
//!
//! It keeps its own segment table, empty at the start of every task, and
//! applies segment writes in the order it executes them. A reference to a
//! segment no executed write has set is a fault, whatever the producer's
//! table said when the stream was built.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{FrameArena, PhysAddr, SegAddr, SegmentTable};

use super::{ExecutionSummary, TaskConsumer};
use crate::command::{Command, RawCommand, RECORD};
use crate::error::ConsumerFault;
use crate::task::TaskDescriptor;

/// Nesting limit for calls into lists in task memory.
pub const MAX_CALL_DEPTH: usize = 18;

/// Default watchdog limit on executed records per task.
pub const DEFAULT_COMMAND_LIMIT: u32 = 1 << 20;

/// What one task did, beyond the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    /// Frame executed.
    pub frame: u64,
    /// Counters.
    pub summary: ExecutionSummary,
    /// Resolved targets of calls outside task memory, in order.
    pub external_calls: Vec<PhysAddr>,
    /// Last color image set.
    pub color_image: Option<PhysAddr>,
    /// Last depth image set.
    pub depth_image: Option<PhysAddr>,
}

/// CPU command interpreter.
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    command_limit: u32,
    traces: Option<Arc<Mutex<Vec<ExecutionTrace>>>>,
}

impl CommandInterpreter {
    /// Creates an interpreter with the default watchdog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_limit: DEFAULT_COMMAND_LIMIT,
            traces: None,
        }
    }

    /// Sets the watchdog limit.
    #[must_use]
    pub const fn with_command_limit(mut self, limit: u32) -> Self {
        self.command_limit = limit;
        self
    }

    /// Appends a trace of every successful task to `sink`.
    #[must_use]
    pub fn with_trace_sink(mut self, sink: Arc<Mutex<Vec<ExecutionTrace>>>) -> Self {
        self.traces = Some(sink);
        self
    }

    /// Executes a task.
    ///
    /// # Errors
    ///
    /// The first [`ConsumerFault`] hit.
    pub fn run(&self, task: &TaskDescriptor, memory: &FrameArena) -> Result<ExecutionTrace, ConsumerFault> {
        let mut segments = SegmentTable::new();
        let mut trace = ExecutionTrace {
            frame: task.frame(),
            ..ExecutionTrace::default()
        };
        let mut stack: Vec<PhysAddr> = Vec::with_capacity(MAX_CALL_DEPTH);
        let mut pc = task.data().addr;

        loop {
            if trace.summary.commands >= self.command_limit {
                return Err(ConsumerFault::Stalled {
                    executed: trace.summary.commands,
                });
            }

            let at = pc;
            let raw = memory
                .offset_of(at)
                .and_then(|offset| RawCommand::read(memory, offset))
                .ok_or(ConsumerFault::AddressOutOfRange { addr: at })?;
            let cmd = raw.decode().ok_or(ConsumerFault::Malformed {
                addr: at,
                w0: raw.w0,
                w1: raw.w1,
            })?;
            trace.summary.commands += 1;
            pc = at.add(RECORD as u32);

            let resolve = |segments: &SegmentTable, addr: SegAddr| {
                if segments.is_set(addr.segment()) {
                    Ok(segments.resolve(addr))
                } else {
                    Err(ConsumerFault::UnsetSegment {
                        addr: at,
                        segment: addr.segment().get(),
                    })
                }
            };

            match cmd {
                Command::SetSegment { id, base } => {
                    segments.set(id, base, 0).map_err(|_| ConsumerFault::Malformed {
                        addr: at,
                        w0: raw.w0,
                        w1: raw.w1,
                    })?;
                    trace.summary.segments_set += 1;
                }
                Command::CallList { addr } => {
                    let target = resolve(&segments, addr)?;
                    if memory.contains(target) {
                        if stack.len() >= MAX_CALL_DEPTH {
                            return Err(ConsumerFault::CallStackOverflow { addr: target });
                        }
                        stack.push(pc);
                        pc = target;
                        trace.summary.calls += 1;
                    } else {
                        trace.external_calls.push(target);
                        trace.summary.external_calls += 1;
                    }
                }
                Command::BranchList { addr } => {
                    let target = resolve(&segments, addr)?;
                    trace.summary.branches += 1;
                    if memory.contains(target) {
                        pc = target;
                    } else {
                        // A resident list runs to its own end, which ends ours.
                        trace.external_calls.push(target);
                        trace.summary.external_calls += 1;
                        match stack.pop() {
                            Some(ret) => pc = ret,
                            None => break,
                        }
                    }
                }
                Command::EndList => match stack.pop() {
                    Some(ret) => pc = ret,
                    None => break,
                },
                Command::Triangle { .. } => trace.summary.triangles += 1,
                Command::SetColorImage { addr } => trace.color_image = Some(resolve(&segments, addr)?),
                Command::SetDepthImage { addr } => trace.depth_image = Some(resolve(&segments, addr)?),
                other => {
                    if let Some(addr) = other.reference() {
                        resolve(&segments, addr)?;
                    }
                }
            }
        }

        Ok(trace)
    }
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskConsumer for CommandInterpreter {
    fn execute(&mut self, task: &TaskDescriptor, memory: &FrameArena) -> Result<ExecutionSummary, ConsumerFault> {
        let trace = self.run(task, memory)?;
        let summary = trace.summary;
        if let Some(sink) = &self.traces {
            sink.lock().push(trace);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;
    use crate::command::Vertex;
    use crate::task::ProgramRef;
    use crate::test_support::test_frame;
    use tessera_core::SegmentId;

    #[test]
    fn test_executes_prologue_and_geometry() {
        let mut frame = test_frame(1);
        let fb = frame.framebuffer();
        {
            let mut opaque = frame.open(BufferKind::Opaque).unwrap();
            let verts = [Vertex::new([0, 0, 0], [255; 4]); 3];
            opaque.vertices(&verts, 0).unwrap();
            opaque.triangle(0, 1, 2).unwrap();
        }
        let finished = frame.finish(&ProgramRef::default()).unwrap();

        let trace = CommandInterpreter::new().run(&finished.task, &finished.arena).unwrap();
        assert_eq!(trace.summary.triangles, 1);
        assert_eq!(trace.summary.branches, 3);
        assert_eq!(trace.summary.segments_set, 3);
        assert_eq!(trace.color_image, Some(fb));
        assert!(trace.external_calls.is_empty());
    }

    #[test]
    fn test_calls_into_task_memory_return() {
        let mut frame = test_frame(0);
        // A small list in the arena, called twice.
        let list = frame.alloc_slice(&[Command::Triangle { v: [0, 1, 2] }.encode(), Command::EndList.encode()]).unwrap();
        {
            let mut opaque = frame.open(BufferKind::Opaque).unwrap();
            opaque.call_list(list.segmented()).unwrap();
            opaque.call_list(list.segmented()).unwrap();
            opaque.call_list(SegAddr::new(SegmentId::PHYSICAL, 0x0080_0000)).unwrap();
        }
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let trace = CommandInterpreter::new().run(&finished.task, &finished.arena).unwrap();
        assert_eq!(trace.summary.calls, 2);
        assert_eq!(trace.summary.triangles, 2);
        assert_eq!(trace.external_calls, [PhysAddr(0x0080_0000)]);
    }

    #[test]
    fn test_unset_segment_faults() {
        let mut frame = test_frame(0);
        frame.set_validate_segments(false);
        frame
            .open(BufferKind::Opaque)
            .unwrap()
            .call_list(SegAddr::new(SegmentId::OBJECT, 0x10))
            .unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let opaque = finished.buffers.start_addr(&finished.arena, BufferKind::Opaque);
        let fault = CommandInterpreter::new().run(&finished.task, &finished.arena).unwrap_err();
        assert_eq!(fault, ConsumerFault::UnsetSegment { addr: opaque, segment: 6 });
    }

    #[test]
    fn test_recursion_overflows_call_stack() {
        let mut frame = test_frame(0);
        let span = frame.alloc(8).unwrap();
        let this = frame.phys(span);
        frame
            .bytes_mut(span)[..8]
            .copy_from_slice(bytemuck::bytes_of(&Command::CallList { addr: this.segmented() }.encode()));
        frame.open(BufferKind::Opaque).unwrap().call_list(this.segmented()).unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let fault = CommandInterpreter::new().run(&finished.task, &finished.arena).unwrap_err();
        assert_eq!(fault, ConsumerFault::CallStackOverflow { addr: this });
    }

    #[test]
    fn test_watchdog() {
        let mut frame = test_frame(0);
        let span = frame.alloc(16).unwrap();
        let this = frame.phys(span);
        let looping = [Command::Noop.encode(), Command::BranchList { addr: this.segmented() }.encode()];
        frame.bytes_mut(span).copy_from_slice(bytemuck::cast_slice(&looping));
        frame.open(BufferKind::Opaque).unwrap().call_list(this.segmented()).unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let fault = CommandInterpreter::new()
            .with_command_limit(500)
            .run(&finished.task, &finished.arena)
            .unwrap_err();
        assert_eq!(fault, ConsumerFault::Stalled { executed: 500 });
    }

    #[test]
    fn test_malformed_record_faults() {
        let mut frame = test_frame(0);
        let bad = frame.alloc_slice(&[RawCommand { w0: 0x4200_0000, w1: 0 }]).unwrap();
        frame.open(BufferKind::Opaque).unwrap().call_list(bad.segmented()).unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let fault = CommandInterpreter::new().run(&finished.task, &finished.arena).unwrap_err();
        assert_eq!(fault, ConsumerFault::Malformed { addr: bad, w0: 0x4200_0000, w1: 0 });
    }

    #[test]
    fn test_trace_sink() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut interpreter = CommandInterpreter::new().with_trace_sink(Arc::clone(&sink));
        let finished = test_frame(4).finish(&ProgramRef::default()).unwrap();
        let summary = interpreter.execute(&finished.task, &finished.arena).unwrap();
        assert_eq!(sink.lock().len(), 1);
        assert_eq!(sink.lock()[0].frame, 4);
        assert_eq!(sink.lock()[0].summary, summary);
    }
}
