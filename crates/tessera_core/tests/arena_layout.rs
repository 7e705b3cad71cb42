//! Arena and configuration behaviour through the public API.

use tessera_core::{
    CoreError, FrameArena, FrameConfig, PhysAddr, SegAddr, SegmentId, SegmentTable, ARENA_ALIGN,
};

#[test]
fn test_tail_allocation_past_head_is_exhaustion() {
    let mut arena = FrameArena::new(PhysAddr(0x0010_0000), 4096);

    let head = arena.alloc_head(100).unwrap();
    assert_eq!(head.offset, 0);
    assert_eq!(head.len, 112);

    let err = arena.alloc_tail(4000).unwrap_err();
    assert_eq!(
        err,
        CoreError::ArenaExhausted {
            requested: 4000,
            head: 112,
            tail: 4096
        }
    );
    // The failed request left both cursors where they were.
    assert_eq!(arena.head_used(), 112);
    assert_eq!(arena.tail_used(), 0);
    assert_eq!(arena.free(), 4096 - 112);
}

#[test]
fn test_both_ends_meet_exactly() {
    let mut arena = FrameArena::new(PhysAddr(0x0010_0000), 4096);
    let head = arena.alloc_head(2048).unwrap();
    let tail = arena.alloc_tail(2048).unwrap();
    assert_eq!(head.end(), tail.offset);
    assert_eq!(arena.free(), 0);
    assert!(arena.alloc_head(1).is_err());
    assert!(arena.alloc_tail(1).is_err());

    arena.reset();
    assert_eq!(arena.free(), 4096);
    assert_eq!(arena.alloc_tail(16).unwrap().offset, 4096 - ARENA_ALIGN);
}

#[test]
fn test_physical_addresses_follow_offsets() {
    let mut arena = FrameArena::new(PhysAddr(0x0010_0000), 4096);
    let span = arena.alloc_tail(32).unwrap();
    let addr = arena.phys(span.offset);
    assert_eq!(addr, PhysAddr(0x0010_0000 + 4096 - 32));
    assert!(arena.contains(addr));
    assert_eq!(arena.offset_of(addr), Some(span.offset));
    assert!(!arena.contains(PhysAddr(0x0010_1000)));
}

#[test]
fn test_config_from_toml_builds_pools() {
    let config = FrameConfig::from_toml_str(
        r"
        arena_size = 0x30000
        arena_bases = [0x100000, 0x130000]
        opaque_buffer_size = 0x8000
        framebuffers = [0x200000, 0x225800]
        validate_segments = true
        ",
    )
    .unwrap();

    let bases = config.pool_bases();
    assert_eq!(bases, vec![PhysAddr(0x0010_0000), PhysAddr(0x0013_0000)]);
    assert!(config.reserved_bytes() <= u64::from(config.arena_size));
    assert!(config.validate_segments);
}

#[test]
fn test_config_rejects_pool_past_address_space() {
    let err = FrameConfig::from_toml_str("arena_bases = [0xFF0000]\n").unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig(_)));
}

#[test]
fn test_config_file_missing_is_io_error() {
    let err = FrameConfig::from_file("/nonexistent/tessera.toml").unwrap_err();
    assert!(matches!(err, CoreError::ConfigIo(_)));
}

#[test]
fn test_segment_mapping_persists_but_must_be_rewritten() {
    let mut table = SegmentTable::new();
    table.begin_frame(0);
    table.set(SegmentId::SCENE, PhysAddr(0x0030_0000), 0).unwrap();
    let addr = SegAddr::new(SegmentId::SCENE, 0x10);
    assert!(table.check_visible(addr, 2).is_ok());
    assert_eq!(table.resolve(addr), PhysAddr(0x0030_0010));

    table.begin_frame(1);
    assert!(matches!(
        table.check_visible(addr, 0),
        Err(CoreError::SegmentUnset { segment: 2, stream: 0 })
    ));
}
