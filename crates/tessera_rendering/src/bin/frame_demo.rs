//! # Frame Demo
//!
//! Builds a handful of frames for a cullable room with an orbiting camera,
//! a spinning actor and a HUD bar, and executes them on the CPU command
//! interpreter.
//!
//! Run with: `cargo run --bin frame_demo [config.toml]`

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{FrameConfig, PhysAddr, SegAddr, SegmentId};
use tessera_rendering::command::matrix_flags;
use tessera_rendering::culling::{look_at, perspective, IDENTITY};
use tessera_rendering::{
    BoundingSphere, BufferKind, CommandInterpreter, DrawPhases, DrawRoutine, ExecutionTrace, Frame,
    FrameScheduler, GeometryGroup, ProgramRef, RenderResult, RoomShape, Vertex, Viewport, VisibilityEngine,
};
use tracing::Level;

/// Frames to build.
const FRAMES: u64 = 8;
/// Where the room's prebuilt lists are resident.
const ROOM_BASE: u32 = 0x0060_0000;
const SCREEN_WIDTH: u16 = 320;
const SCREEN_HEIGHT: u16 = 240;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => FrameConfig::from_file(path)?,
        None => FrameConfig::default(),
    };

    let traces = Arc::new(Mutex::new(Vec::new()));
    let consumer = CommandInterpreter::new().with_trace_sink(Arc::clone(&traces));
    let mut scheduler = FrameScheduler::new(config.clone(), ProgramRef::default(), Box::new(consumer))?;

    let room = RoomShape::Cullable(room_groups());
    let mut engine = VisibilityEngine::new(config.max_cull_entries);
    let projection = perspective(1.0, f32::from(SCREEN_WIDTH) / f32::from(SCREEN_HEIGHT), 1.0, 500.0);

    let mut setup = |frame: &mut Frame| -> RenderResult<()> {
        let mut work = frame.open(BufferKind::Work)?;
        work.viewport(&Viewport::for_screen(SCREEN_WIDTH, SCREEN_HEIGHT))?;
        work.matrix(&projection, matrix_flags::PROJECTION | matrix_flags::LOAD)?;
        work.set_segment(SegmentId::ROOM, PhysAddr(ROOM_BASE))
    };

    let mut room_pass = |frame: &mut Frame| -> RenderResult<()> {
        #[allow(clippy::cast_precision_loss)]
        let angle = frame.number() as f32 * 0.4;
        let eye = [angle.sin() * 40.0, 10.0, angle.cos() * 40.0];
        engine.set_camera(&look_at(eye, [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]), &projection);
        room.draw(frame, &mut engine, DrawPhases::ALL)
    };

    let mut actor = |frame: &mut Frame| -> RenderResult<()> {
        #[allow(clippy::cast_precision_loss)]
        let angle = frame.number() as f32 * 0.3;
        let mut model = IDENTITY;
        model[0][0] = angle.cos();
        model[0][2] = -angle.sin();
        model[2][0] = angle.sin();
        model[2][2] = angle.cos();

        let mut out = frame.open(BufferKind::Opaque)?;
        out.matrix(&model, matrix_flags::PUSH | matrix_flags::LOAD)?;
        out.vertices(&actor_mesh(), 0)?;
        out.triangle(0, 1, 2)?;
        out.triangle(0, 2, 3)?;
        out.pop_matrix(1)
    };

    let mut hud = |frame: &mut Frame| -> RenderResult<()> {
        let mut out = frame.open(BufferKind::Overlay)?;
        out.pipe_sync()?;
        out.prim_color(0x2040_80C0)?;
        out.fill_rect(8, SCREEN_HEIGHT - 24, SCREEN_WIDTH - 8, SCREEN_HEIGHT - 8)
    };

    for _ in 0..FRAMES {
        let routines: &mut [&mut dyn DrawRoutine] = &mut [&mut setup, &mut room_pass, &mut actor, &mut hud];
        let task = scheduler.run_frame(routines)?;
        if let Some(stats) = scheduler.last_stats() {
            tracing::info!(
                task = %task,
                records = stats.total_records(),
                visible = stats.culling.visible,
                culled = stats.culling.culled,
                arena_free = stats.arena_free,
                "frame submitted"
            );
        }
    }
    scheduler.wait_idle()?;

    let consumer = scheduler.submitter().consumer_stats();
    tracing::info!(
        tasks = consumer.tasks,
        faults = consumer.faults,
        busy_us = u64::try_from(consumer.busy.as_micros()).unwrap_or(u64::MAX),
        "consumer finished"
    );
    for trace in traces.lock().iter() {
        log_trace(trace);
    }
    Ok(())
}

fn log_trace(trace: &ExecutionTrace) {
    tracing::info!(
        frame = trace.frame,
        commands = trace.summary.commands,
        triangles = trace.summary.triangles,
        room_lists = trace.summary.external_calls,
        color_image = ?trace.color_image,
        "executed"
    );
}

/// A 6x6 grid of pillars, every third one with a translucent decal.
fn room_groups() -> Vec<GeometryGroup> {
    (0u16..36)
        .map(|i| {
            let x = f32::from(i % 6) * 12.0 - 30.0;
            let z = f32::from(i / 6) * 12.0 - 30.0;
            let offset = u32::from(i) * 0x200;
            GeometryGroup {
                bounds: BoundingSphere::new([x, 4.0, z], 5.0),
                opaque: Some(SegAddr::new(SegmentId::ROOM, offset)),
                translucent: (i % 3 == 0).then_some(SegAddr::new(SegmentId::ROOM, offset + 0x100)),
            }
        })
        .collect()
}

fn actor_mesh() -> [Vertex; 4] {
    [
        Vertex::new([-20, 0, -20], [200, 40, 40, 255]),
        Vertex::new([20, 0, -20], [40, 200, 40, 255]),
        Vertex::new([20, 30, 20], [40, 40, 200, 255]),
        Vertex::new([-20, 30, 20], [200, 200, 200, 255]),
    ]
}
