//! End-to-end frame construction: chaining, validation and execution on the
//! consumer thread.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{CoreError, FrameArena, FrameConfig, PhysAddr, SegAddr, SegmentId, SegmentTable};
use tessera_rendering::{
    walk_chain, BufferKind, Command, CommandInterpreter, ConsumerFault, DrawPair, DrawPhases, DrawRoutine, Frame,
    FrameScheduler, ProgramRef, RawCommand, RenderError, RenderResult, RoomShape, Vertex, VisibilityEngine,
};

const ROOM_BASE: u32 = 0x0060_0000;

fn config() -> FrameConfig {
    FrameConfig {
        arena_size: 0x2000,
        arena_bases: vec![0x0010_0000, 0x0010_2000],
        work_buffer_size: 0x100,
        opaque_buffer_size: 0x400,
        translucent_buffer_size: 0x100,
        overlay_buffer_size: 0x80,
        task_scratch_size: 0x100,
        task_output_size: 0x100,
        consumer_timeout_ms: 5000,
        validate_segments: true,
        validate_bounds: true,
        max_cull_entries: 16,
        ..FrameConfig::default()
    }
}

fn begin(number: u64) -> Frame {
    let config = config();
    let arena = FrameArena::new(PhysAddr(config.arena_bases[0]), config.arena_size as usize);
    Frame::begin(number, arena, SegmentTable::new(), &config).unwrap()
}

fn record_at(arena: &FrameArena, addr: PhysAddr) -> Command {
    let offset = arena.offset_of(addr).unwrap();
    RawCommand::read(arena, offset).unwrap().decode().unwrap()
}

#[test]
fn test_branch_follows_last_appended_command() {
    let mut frame = begin(0);
    {
        let mut opaque = frame.open(BufferKind::Opaque).unwrap();
        opaque.prim_color(0x1111_11FF).unwrap();
        opaque.prim_color(0x2222_22FF).unwrap();
        opaque.prim_color(0x3333_33FF).unwrap();
        opaque.close().unwrap();
    }
    let finished = frame.finish(&ProgramRef::default()).unwrap();
    let arena = &finished.arena;

    let opaque_start = finished.buffers.start_addr(arena, BufferKind::Opaque);
    let translucent_start = finished.buffers.start_addr(arena, BufferKind::Translucent);
    assert_eq!(
        record_at(arena, opaque_start.add(16)),
        Command::SetPrimColor { rgba: 0x3333_33FF }
    );
    assert_eq!(
        record_at(arena, opaque_start.add(24)),
        Command::BranchList {
            addr: translucent_start.segmented()
        }
    );
}

#[test]
fn test_chain_visits_buffers_in_order_and_ends() {
    let mut frame = begin(3);
    frame.open(BufferKind::Overlay).unwrap().fill_rect(0, 0, 15, 15).unwrap();
    frame.open(BufferKind::Translucent).unwrap().prim_color(0x8080_8080).unwrap();
    let finished = frame.finish(&ProgramRef::default()).unwrap();

    let walked = walk_chain(&finished.arena, &finished.buffers).unwrap();
    let kinds: Vec<BufferKind> = walked.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, BufferKind::CHAIN.to_vec());

    assert_eq!(
        walked[3].commands,
        vec![
            Command::FillRect {
                ulx: 0,
                uly: 0,
                lrx: 15,
                lry: 15
            },
            Command::PipeSync,
            Command::FullSync
        ]
    );
    assert_eq!(finished.task.frame(), 3);
    assert_eq!(
        finished.task.data().addr,
        finished.buffers.start_addr(&finished.arena, BufferKind::Work)
    );
}

#[test]
fn test_reference_before_set_in_chain_order_is_rejected() {
    let mut frame = begin(0);
    let list = SegAddr::new(SegmentId::ROOM, 0x40);

    // Opaque runs before Overlay, so a mapping written in Overlay is stale there.
    frame
        .open(BufferKind::Overlay)
        .unwrap()
        .set_segment(SegmentId::ROOM, PhysAddr(ROOM_BASE))
        .unwrap();
    let err = frame.open(BufferKind::Opaque).unwrap().call_list(list).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Core(CoreError::SegmentUnset { segment: 3, stream: 1 })
    ));

    // Written in Work it is visible everywhere after.
    frame
        .open(BufferKind::Work)
        .unwrap()
        .set_segment(SegmentId::ROOM, PhysAddr(ROOM_BASE))
        .unwrap();
    frame.open(BufferKind::Opaque).unwrap().call_list(list).unwrap();
}

#[test]
fn test_overflow_ends_the_frame() {
    let mut frame = begin(0);
    let err = {
        let mut overlay = frame.open(BufferKind::Overlay).unwrap();
        let mut result = Ok(());
        for _ in 0..64 {
            result = overlay.pipe_sync();
            if result.is_err() {
                break;
            }
        }
        result.unwrap_err()
    };
    assert!(matches!(
        err,
        RenderError::BufferOverflow {
            buffer: BufferKind::Overlay,
            ..
        }
    ));
}

#[test]
fn test_scheduler_executes_every_frame_in_order() {
    let traces = Arc::new(Mutex::new(Vec::new()));
    let consumer = CommandInterpreter::new().with_trace_sink(Arc::clone(&traces));
    let config = config();
    let framebuffers = config.framebuffers;
    let mut scheduler = FrameScheduler::new(config, ProgramRef::default(), Box::new(consumer)).unwrap();

    let room = RoomShape::Normal(vec![
        DrawPair {
            opaque: Some(SegAddr::new(SegmentId::ROOM, 0x000)),
            translucent: Some(SegAddr::new(SegmentId::ROOM, 0x100)),
        },
        DrawPair {
            opaque: Some(SegAddr::new(SegmentId::ROOM, 0x200)),
            translucent: None,
        },
    ]);
    let mut engine = VisibilityEngine::new(4);

    let mut setup = |frame: &mut Frame| -> RenderResult<()> {
        frame
            .open(BufferKind::Work)?
            .set_segment(SegmentId::ROOM, PhysAddr(ROOM_BASE))
    };
    let mut room_pass = |frame: &mut Frame| -> RenderResult<()> { room.draw(frame, &mut engine, DrawPhases::ALL) };
    let mut actor = |frame: &mut Frame| -> RenderResult<()> {
        let mut out = frame.open(BufferKind::Opaque)?;
        out.vertices(&[Vertex::new([0, 0, 0], [255; 4]); 3], 0)?;
        out.triangle(0, 1, 2)
    };

    for _ in 0..4 {
        let routines: &mut [&mut dyn DrawRoutine] = &mut [&mut setup, &mut room_pass, &mut actor];
        scheduler.run_frame(routines).unwrap();
    }
    scheduler.wait_idle().unwrap();
    assert_eq!(scheduler.idle_pools(), 2);
    assert_eq!(scheduler.next_frame(), 4);

    let traces = traces.lock();
    let frames: Vec<u64> = traces.iter().map(|t| t.frame).collect();
    assert_eq!(frames, vec![0, 1, 2, 3]);
    for trace in traces.iter() {
        assert_eq!(trace.summary.triangles, 1);
        assert_eq!(
            trace.external_calls,
            vec![
                PhysAddr(ROOM_BASE),
                PhysAddr(ROOM_BASE + 0x200),
                PhysAddr(ROOM_BASE + 0x100)
            ]
        );
        let expected = framebuffers[usize::from(trace.frame % 2 == 1)];
        assert_eq!(trace.color_image, Some(PhysAddr(expected)));
    }
    assert_eq!(scheduler.submitter().consumer_stats().tasks, 4);
}

#[test]
fn test_consumer_fault_is_reported_to_producer() {
    let config = config();
    let mut scheduler =
        FrameScheduler::new(config, ProgramRef::default(), Box::new(CommandInterpreter::new())).unwrap();

    // A call into arena memory that holds no valid record.
    let mut bad = |frame: &mut Frame| -> RenderResult<()> {
        let span = frame.alloc(16)?;
        frame.bytes_mut(span).fill(0xEE);
        let target = frame.phys(span);
        frame.open(BufferKind::Opaque)?.call_list(target.segmented())
    };
    let routines: &mut [&mut dyn DrawRoutine] = &mut [&mut bad];
    scheduler.run_frame(routines).unwrap();

    let err = scheduler.wait_idle().unwrap_err();
    assert!(matches!(err, RenderError::ConsumerFault { frame: 0, .. }));
    let report = scheduler.submitter().last_fault().unwrap();
    assert_eq!(report.frame, 0);
    assert!(matches!(
        report.fault,
        ConsumerFault::Malformed {
            w0: 0xEEEE_EEEE,
            w1: 0xEEEE_EEEE,
            ..
        }
    ));
    // The faulting list is called, not chained, so only the chain is dumped.
    assert!(report.disassembly.iter().any(|line| line.contains("call")));
}
