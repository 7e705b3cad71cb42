//! # Frame Build Benchmark
//!
//! Producer-side cost of one frame, without the consumer thread:
//! - Frame begin (reset, carve, prologue)
//! - Culling and emitting a grid of geometry groups
//! - Chaining and task construction
//!
//! Run with: `cargo bench --package tessera_rendering`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{FrameArena, FrameConfig, PhysAddr, SegAddr, SegmentId, SegmentTable};
use tessera_rendering::culling::{look_at, perspective};
use tessera_rendering::{
    BoundingSphere, BufferKind, DrawPhases, Frame, GeometryGroup, ProgramRef, Vertex, VisibilityEngine,
};

/// Room geometry lives outside the arena, like ROM data.
const ROOM_BASE: u32 = 0x0060_0000;

fn config() -> FrameConfig {
    FrameConfig {
        validate_segments: false,
        validate_bounds: false,
        max_cull_entries: 1024,
        ..FrameConfig::default()
    }
}

fn arena(config: &FrameConfig) -> FrameArena {
    FrameArena::new(PhysAddr(config.arena_bases[0]), config.arena_size as usize)
}

/// A square grid of groups in front of the camera, about half of them visible.
fn grid(count: usize) -> Vec<GeometryGroup> {
    let side = (count as f32).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let x = (i % side) as f32 * 4.0 - side as f32 * 2.0;
            let z = -((i / side) as f32 * 4.0) - 2.0;
            let offset = (i as u32) * 0x100;
            GeometryGroup {
                bounds: BoundingSphere::new([x, 0.0, z], 1.5),
                opaque: Some(SegAddr::new(SegmentId::ROOM, offset)),
                translucent: (i % 3 == 0).then_some(SegAddr::new(SegmentId::ROOM, offset + 0x80)),
            }
        })
        .collect()
}

fn engine(capacity: usize) -> VisibilityEngine {
    let mut engine = VisibilityEngine::new(capacity);
    let view = look_at([0.0, 2.0, 0.0], [0.0, 0.0, -10.0], [0.0, 1.0, 0.0]);
    engine.set_camera(&view, &perspective(1.0, 4.0 / 3.0, 1.0, 200.0));
    engine
}

/// Benchmark: begin and finish an empty frame.
fn bench_empty_frame(c: &mut Criterion) {
    let config = config();
    let program = ProgramRef::default();
    let mut pool = Some(arena(&config));
    let mut segments = Some(SegmentTable::new());
    let mut number = 0u64;

    c.bench_function("empty_frame", |b| {
        b.iter(|| {
            let (Some(memory), Some(table)) = (pool.take(), segments.take()) else {
                return;
            };
            let frame = Frame::begin(number, memory, table, &config).expect("begin");
            let finished = frame.finish(&program).expect("finish");
            number += 1;
            black_box(finished.task);
            pool = Some(finished.arena);
            segments = Some(finished.segments);
        });
    });
}

/// Benchmark: cull and emit a room of N groups.
fn bench_cull_and_emit(c: &mut Criterion) {
    let config = config();
    let program = ProgramRef::default();
    let mut group = c.benchmark_group("cull_and_emit");

    for count in [16usize, 128, 1024] {
        let groups = grid(count);
        let mut engine = engine(config.max_cull_entries);
        let mut pool = Some(arena(&config));
        let mut segments = Some(SegmentTable::new());

        group.bench_with_input(BenchmarkId::from_parameter(count), &groups, |b, groups| {
            b.iter(|| {
                let (Some(memory), Some(table)) = (pool.take(), segments.take()) else {
                    return;
                };
                let mut frame = Frame::begin(0, memory, table, &config).expect("begin");
                frame
                    .open(BufferKind::Work)
                    .and_then(|mut w| w.set_segment(SegmentId::ROOM, PhysAddr(ROOM_BASE)))
                    .expect("room segment");
                black_box(engine.cull(groups, &mut frame).len());
                engine.emit(&mut frame, DrawPhases::ALL).expect("emit");
                let finished = frame.finish(&program).expect("finish");
                pool = Some(finished.arena);
                segments = Some(finished.segments);
            });
        });
    }

    group.finish();
}

/// Benchmark: immediate-mode geometry written straight into the opaque buffer.
fn bench_actor_geometry(c: &mut Criterion) {
    let config = config();
    let program = ProgramRef::default();
    let quad = [
        Vertex::new([-10, -10, 0], [255, 0, 0, 255]),
        Vertex::new([10, -10, 0], [0, 255, 0, 255]),
        Vertex::new([10, 10, 0], [0, 0, 255, 255]),
        Vertex::new([-10, 10, 0], [255, 255, 255, 255]),
    ];
    let mut pool = Some(arena(&config));
    let mut segments = Some(SegmentTable::new());

    c.bench_function("actor_quads_256", |b| {
        b.iter(|| {
            let (Some(memory), Some(table)) = (pool.take(), segments.take()) else {
                return;
            };
            let mut frame = Frame::begin(0, memory, table, &config).expect("begin");
            {
                let mut out = frame.open(BufferKind::Opaque).expect("open");
                for _ in 0..256 {
                    out.vertices(&quad, 0).expect("vertices");
                    out.triangle(0, 1, 2).expect("triangle");
                    out.triangle(0, 2, 3).expect("triangle");
                }
            }
            let finished = frame.finish(&program).expect("finish");
            black_box(finished.stats.total_records());
            pool = Some(finished.arena);
            segments = Some(finished.segments);
        });
    });
}

criterion_group!(benches, bench_empty_frame, bench_cull_and_emit, bench_actor_geometry,);

criterion_main!(benches);
