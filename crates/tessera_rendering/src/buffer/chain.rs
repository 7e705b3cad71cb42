//! Linking the buffers into one executable stream, and walking it back.

use tessera_core::{FrameArena, PhysAddr, SegmentId};

use super::{BufferKind, BufferSet, BufferState, Cursor};
use crate::command::{Command, RawCommand, RECORD};
use crate::error::{RenderError, RenderResult};

impl BufferSet {
    /// Terminates every buffer and links them in chain order.
    ///
    /// Work, Opaque and Translucent each get a branch to the start of the
    /// next buffer, written immediately after their last record. Overlay is
    /// terminated with a pipeline sync, a full sync and an end. All buffers
    /// are sealed afterwards.
    ///
    /// # Errors
    ///
    /// [`RenderError::BufferAlreadyOpen`] if a cursor is still out, or
    /// [`RenderError::BufferSealed`] if the set was already chained.
    pub fn chain(&mut self, arena: &mut FrameArena) -> RenderResult<()> {
        if self.chained {
            return Err(RenderError::BufferSealed(BufferKind::Work));
        }
        if let Some(open) = self.buffers.iter().find(|b| b.is_open()) {
            return Err(RenderError::BufferAlreadyOpen(open.kind));
        }

        for kind in BufferKind::CHAIN {
            let branch = kind.next().map(|next| Command::BranchList {
                addr: self.start_addr(arena, next).segmented(),
            });

            let buf = &mut self.buffers[kind.index()];
            let mut cursor = Cursor {
                kind,
                start: buf.start(),
                offset: buf.cursor,
                limit: buf.span.end(),
            };
            match branch {
                Some(cmd) => cursor.write(arena, cmd),
                None => {
                    cursor.write(arena, Command::PipeSync);
                    cursor.write(arena, Command::FullSync);
                    cursor.write(arena, Command::EndList);
                }
            }
            buf.cursor = cursor.offset;
            buf.state = BufferState::Sealed;
        }

        self.chained = true;
        tracing::trace!(
            work = self.get(BufferKind::Work).records(),
            opaque = self.get(BufferKind::Opaque).records(),
            translucent = self.get(BufferKind::Translucent).records(),
            overlay = self.get(BufferKind::Overlay).records(),
            "buffers chained"
        );
        Ok(())
    }

    /// Entry point and byte length of the Work buffer, terminator included.
    #[must_use]
    pub fn work_extent(&self, arena: &FrameArena) -> (PhysAddr, u32) {
        let work = self.get(BufferKind::Work);
        let len = u32::try_from(work.cursor - work.start()).unwrap_or(u32::MAX);
        (arena.phys(work.start()), len)
    }
}

/// The records one buffer contributed to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    /// Buffer walked.
    pub kind: BufferKind,
    /// Every record before the terminating branch or end, in order.
    pub commands: Vec<Command>,
}

/// Walks the chain from the Work buffer, following branches.
///
/// Each buffer is visited once. The walk stops at the first end record.
///
/// # Errors
///
/// [`RenderError::BrokenChain`] if a record is malformed, a buffer runs out
/// without a terminator, a branch does not land on a buffer start, or a
/// buffer would be visited twice.
pub fn walk_chain(arena: &FrameArena, buffers: &BufferSet) -> RenderResult<Vec<ChainSegment>> {
    let mut segments = Vec::with_capacity(BufferKind::CHAIN.len());
    let mut visited = [false; 4];
    let mut kind = BufferKind::Work;

    loop {
        let buf = buffers.get(kind);
        let broken = |offset: usize, reason| RenderError::BrokenChain { at: arena.phys(offset), reason };
        if visited[kind.index()] {
            return Err(broken(buf.start(), "buffer reached twice"));
        }
        visited[kind.index()] = true;

        let mut offset = buf.start();
        let mut commands = Vec::new();
        let next = loop {
            if offset + RECORD > buf.span.end() {
                return Err(broken(offset, "buffer ends without a terminator"));
            }
            let cmd = RawCommand::read(arena, offset)
                .and_then(RawCommand::decode)
                .ok_or_else(|| broken(offset, "malformed record"))?;
            match cmd {
                Command::BranchList { addr } => {
                    if addr.segment() != SegmentId::PHYSICAL {
                        return Err(broken(offset, "branch through a segment"));
                    }
                    let target = arena
                        .offset_of(PhysAddr(addr.offset()))
                        .and_then(|o| buffers.kind_at(o))
                        .ok_or_else(|| broken(offset, "branch target is not a buffer"))?;
                    break Some(target);
                }
                Command::EndList => break None,
                other => commands.push(other),
            }
            offset += RECORD;
        };

        segments.push(ChainSegment { kind, commands });
        match next {
            Some(n) => kind = n,
            None => return Ok(segments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::small_config;
    use tessera_core::{SegAddr, SegmentId};

    fn setup() -> (FrameArena, BufferSet) {
        let config = small_config();
        let mut arena = FrameArena::new(PhysAddr(0x0010_0000), config.arena_size as usize);
        let set = BufferSet::carve(&mut arena, &config).unwrap();
        (arena, set)
    }

    fn fill(arena: &mut FrameArena, set: &mut BufferSet, kind: BufferKind, cmds: &[Command]) {
        let mut cursor = set.open(kind).unwrap();
        for &cmd in cmds {
            cursor.append(arena, cmd).unwrap();
        }
        set.close(cursor).unwrap();
    }

    #[test]
    fn test_branch_follows_last_record() {
        let (mut arena, mut set) = setup();
        let cmds = [Command::Noop, Command::PipeSync, Command::PopMatrix { count: 1 }];
        fill(&mut arena, &mut set, BufferKind::Opaque, &cmds);
        set.chain(&mut arena).unwrap();

        let opaque = set.get(BufferKind::Opaque);
        let branch = RawCommand::read(&arena, opaque.start() + 3 * RECORD)
            .and_then(RawCommand::decode)
            .unwrap();
        let translucent = set.start_addr(&arena, BufferKind::Translucent);
        assert_eq!(branch, Command::BranchList { addr: translucent.segmented() });
        assert_eq!(opaque.records(), 4);
    }

    #[test]
    fn test_walk_preserves_order() {
        let (mut arena, mut set) = setup();
        let room = SegAddr::new(SegmentId::ROOM, 0x100);
        let opaque = [Command::CallList { addr: room }, Command::Triangle { v: [0, 1, 2] }];
        let translucent = [Command::SetPrimColor { rgba: 0xFF00_00FF }];
        let overlay = [Command::FillRect { ulx: 0, uly: 0, lrx: 10, lry: 10 }];
        fill(&mut arena, &mut set, BufferKind::Opaque, &opaque);
        fill(&mut arena, &mut set, BufferKind::Translucent, &translucent);
        fill(&mut arena, &mut set, BufferKind::Overlay, &overlay);
        set.chain(&mut arena).unwrap();

        let walked = walk_chain(&arena, &set).unwrap();
        let kinds: Vec<_> = walked.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, BufferKind::CHAIN);
        assert!(walked[0].commands.is_empty());
        assert_eq!(walked[1].commands, opaque);
        assert_eq!(walked[2].commands, translucent);
        assert_eq!(
            walked[3].commands,
            [overlay[0], Command::PipeSync, Command::FullSync]
        );
    }

    #[test]
    fn test_empty_buffers_still_chain() {
        let (mut arena, mut set) = setup();
        set.chain(&mut arena).unwrap();
        let walked = walk_chain(&arena, &set).unwrap();
        assert_eq!(walked.len(), 4);
        let (entry, len) = set.work_extent(&arena);
        assert_eq!(entry, PhysAddr(0x0010_0000));
        assert_eq!(len, 8);
    }

    #[test]
    fn test_full_buffers_still_fit_terminators() {
        let (mut arena, mut set) = setup();
        for kind in BufferKind::CHAIN {
            let capacity = set.get(kind).capacity();
            fill(&mut arena, &mut set, kind, &vec![Command::Noop; capacity]);
        }
        set.chain(&mut arena).unwrap();
        assert!(walk_chain(&arena, &set).is_ok());
    }

    #[test]
    fn test_chain_twice_rejected() {
        let (mut arena, mut set) = setup();
        set.chain(&mut arena).unwrap();
        assert!(set.chain(&mut arena).is_err());
        assert!(matches!(
            set.open(BufferKind::Overlay),
            Err(RenderError::BufferSealed(BufferKind::Overlay))
        ));
    }

    #[test]
    fn test_chain_with_open_buffer_rejected() {
        let (mut arena, mut set) = setup();
        let _cursor = set.open(BufferKind::Translucent).unwrap();
        assert!(matches!(
            set.chain(&mut arena),
            Err(RenderError::BufferAlreadyOpen(BufferKind::Translucent))
        ));
    }

    #[test]
    fn test_unterminated_walk_is_broken() {
        let (mut arena, mut set) = setup();
        let work = set.get(BufferKind::Work);
        let capacity = work.capacity();
        fill(&mut arena, &mut set, BufferKind::Work, &vec![Command::Noop; capacity]);
        // Not chained: the walk runs into zeroed reserve (noops) then the end of the buffer.
        assert!(matches!(
            walk_chain(&arena, &set),
            Err(RenderError::BrokenChain { reason: "buffer ends without a terminator", .. })
        ));
    }
}
