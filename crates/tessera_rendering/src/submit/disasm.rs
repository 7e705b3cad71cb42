//! Fault diagnostics: a readable dump of the stream around a fault.

use tessera_core::{FrameArena, PhysAddr, SegmentId};

use crate::command::{Command, RawCommand, RECORD};
use crate::error::ConsumerFault;
use crate::task::TaskDescriptor;

/// Records dumped per fault.
const FAULT_DUMP_LIMIT: usize = 512;

/// Disassembles the stream at `start`, following branches through the
/// identity segment.
///
/// Calls are listed but not entered. Stops at the top-level end record,
/// at `limit` lines, or at the first record that cannot be read.
#[must_use]
pub fn disassemble(memory: &FrameArena, start: PhysAddr, limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pc = start;

    while lines.len() < limit {
        let Some(raw) = memory
            .offset_of(pc)
            .and_then(|offset| RawCommand::read(memory, offset))
        else {
            lines.push(format!("{pc}: <outside task memory>"));
            break;
        };
        let Some(cmd) = raw.decode() else {
            lines.push(format!("{pc}: {:08x} {:08x}  <malformed>", raw.w0, raw.w1));
            break;
        };
        lines.push(format!("{pc}: {:08x} {:08x}  {cmd}", raw.w0, raw.w1));

        match cmd {
            Command::BranchList { addr } if addr.segment() == SegmentId::PHYSICAL => {
                pc = PhysAddr(addr.offset());
            }
            Command::BranchList { .. } => {
                lines.push("  <branch through segment not followed>".into());
                break;
            }
            Command::EndList => break,
            _ => pc = pc.add(RECORD as u32),
        }
    }
    lines
}

/// Everything known about a faulted task, captured before its memory is
/// released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    /// Frame that faulted.
    pub frame: u64,
    /// The task.
    pub task: TaskDescriptor,
    /// The fault.
    pub fault: ConsumerFault,
    /// Disassembly of the chain. The faulting record, when it is on the
    /// chain, is marked with `>>`.
    pub disassembly: Vec<String>,
}

impl FaultReport {
    /// Captures a report while `memory` is still valid.
    #[must_use]
    pub fn capture(task: &TaskDescriptor, memory: &FrameArena, fault: ConsumerFault) -> Self {
        let marker = fault_addr(&fault).map(|addr| format!("{addr}:"));
        let disassembly = disassemble(memory, task.data().addr, FAULT_DUMP_LIMIT)
            .into_iter()
            .map(|line| match &marker {
                Some(m) if line.starts_with(m.as_str()) => format!(">> {line}"),
                _ => format!("   {line}"),
            })
            .collect();
        Self {
            frame: task.frame(),
            task: *task,
            fault,
            disassembly,
        }
    }
}

fn fault_addr(fault: &ConsumerFault) -> Option<PhysAddr> {
    match *fault {
        ConsumerFault::Malformed { addr, .. }
        | ConsumerFault::UnsetSegment { addr, .. }
        | ConsumerFault::AddressOutOfRange { addr }
        | ConsumerFault::CallStackOverflow { addr } => Some(addr),
        ConsumerFault::Stalled { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;
    use crate::task::ProgramRef;
    use crate::test_support::test_frame;
    use tessera_core::SegAddr;

    #[test]
    fn test_disassembly_follows_chain() {
        let mut frame = test_frame(0);
        frame.open(BufferKind::Overlay).unwrap().prim_color(0x1122_3344).unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();

        let lines = disassemble(&finished.arena, finished.task.data().addr, 100);
        assert!(lines[0].ends_with("segment 0x0 = 0x00000000"));
        assert!(lines.iter().any(|l| l.ends_with("primcolor 0x11223344")));
        assert!(lines.last().unwrap().ends_with("end"));
        // Prologue, three branches, the overlay record and three terminators.
        assert_eq!(lines.len(), 6 + 3 + 1 + 3);
    }

    #[test]
    fn test_limit_and_bad_start() {
        let frame = test_frame(0);
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        assert_eq!(disassemble(&finished.arena, finished.task.data().addr, 2).len(), 2);
        let outside = disassemble(&finished.arena, PhysAddr(0x10), 4);
        assert_eq!(outside, ["0x00000010: <outside task memory>"]);
    }

    #[test]
    fn test_report_marks_fault() {
        let mut frame = test_frame(0);
        frame
            .open(BufferKind::Opaque)
            .unwrap()
            .push(Command::CallList { addr: SegAddr::from_raw(0) })
            .unwrap();
        let finished = frame.finish(&ProgramRef::default()).unwrap();
        let opaque = finished.buffers.start_addr(&finished.arena, BufferKind::Opaque);

        let report = FaultReport::capture(
            &finished.task,
            &finished.arena,
            ConsumerFault::AddressOutOfRange { addr: opaque },
        );
        let marked: Vec<_> = report.disassembly.iter().filter(|l| l.starts_with(">>")).collect();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].ends_with("call 0x00000000"));
    }
}
