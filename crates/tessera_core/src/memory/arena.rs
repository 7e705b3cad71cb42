//! # Frame Arena
//!
//! A dual-ended bump allocator over one fixed block, reset once per frame.
//!
//! ```text
//!  start                                                    start + capacity
//!  ┌──────────────────┬───────────────────────────┬──────────────────────┐
//!  │ head allocations │           free            │   tail allocations   │
//!  └──────────────────┴───────────────────────────┴──────────────────────┘
//!                     ▲ head                      ▲ tail
//! ```
//!
//! The head grows upward, the tail grows downward, and `head <= tail` holds
//! after every successful call. A request that would make them cross fails
//! with [`CoreError::ArenaExhausted`] and leaves both cursors untouched.

use bytemuck::Pod;

use crate::address::PhysAddr;
use crate::error::{CoreError, CoreResult};

/// Alignment of every allocation, in bytes.
pub const ARENA_ALIGN: usize = 16;

/// Rounds `size` up to [`ARENA_ALIGN`].
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ARENA_ALIGN - 1) {
        Some(v) => Some(v & !(ARENA_ALIGN - 1)),
        None => None,
    }
}

/// A region carved from a [`FrameArena`].
///
/// Spans are plain offsets, valid until the next [`FrameArena::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    /// Byte offset from the arena start.
    pub offset: usize,
    /// Length in bytes (already aligned).
    pub len: usize,
}

impl Span {
    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Dual-ended frame arena.
///
/// # Thread Safety
///
/// The arena is owned by exactly one side at a time: the producer while a
/// frame is being built, the consumer while the frame's task executes.
/// Ownership moves with the value, so no interior locking is needed.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = FrameArena::new(PhysAddr(0x0010_0000), 4096);
///
/// let matrix = arena.alloc_head(64)?;
/// let stream = arena.alloc_tail(1024)?;
///
/// // Next frame
/// arena.reset();
/// ```
pub struct FrameArena {
    /// The backing storage.
    storage: Box<[u8]>,
    /// Physical address of the first byte.
    base: PhysAddr,
    /// Head cursor (grows upward).
    head: usize,
    /// Tail cursor (grows downward).
    tail: usize,
    /// Smallest gap between the cursors since the last reset.
    min_free: usize,
    /// Frames this arena has been reset for.
    generation: u64,
}

impl FrameArena {
    /// Creates a new arena of `capacity` bytes mapped at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a multiple of [`ARENA_ALIGN`].
    #[must_use]
    pub fn new(base: PhysAddr, capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            capacity % ARENA_ALIGN == 0,
            "Capacity must be a multiple of {ARENA_ALIGN}"
        );

        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            base,
            head: 0,
            tail: capacity,
            min_free: capacity,
            generation: 0,
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Physical address of the arena start.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    /// Current head cursor.
    #[inline]
    #[must_use]
    pub const fn head(&self) -> usize {
        self.head
    }

    /// Current tail cursor.
    #[inline]
    #[must_use]
    pub const fn tail(&self) -> usize {
        self.tail
    }

    /// Bytes claimed from the head.
    #[inline]
    #[must_use]
    pub const fn head_used(&self) -> usize {
        self.head
    }

    /// Bytes claimed from the tail.
    #[inline]
    #[must_use]
    pub fn tail_used(&self) -> usize {
        self.capacity() - self.tail
    }

    /// Bytes still free between the cursors.
    #[inline]
    #[must_use]
    pub const fn free(&self) -> usize {
        self.tail - self.head
    }

    /// Smallest free gap seen since the last reset.
    #[inline]
    #[must_use]
    pub const fn low_water(&self) -> usize {
        self.min_free
    }

    /// Number of resets performed.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Allocates `size` bytes from the head.
    ///
    /// The head advances by `align_up(size)`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ArenaExhausted`] if the head would pass the tail.
    pub fn alloc_head(&mut self, size: usize) -> CoreResult<Span> {
        let len = self.aligned(size)?;
        let Some(new_head) = self.head.checked_add(len).filter(|&h| h <= self.tail) else {
            return Err(self.exhausted(len));
        };

        let span = Span { offset: self.head, len };
        self.head = new_head;
        self.track();
        tracing::trace!(offset = span.offset, len, "arena head alloc");
        Ok(span)
    }

    /// Allocates `size` bytes from the tail.
    ///
    /// The tail retreats by `align_up(size)` first and the new tail is
    /// returned as the span start.
    ///
    /// # Errors
    ///
    /// [`CoreError::ArenaExhausted`] if the tail would pass the head.
    pub fn alloc_tail(&mut self, size: usize) -> CoreResult<Span> {
        let len = self.aligned(size)?;
        if len > self.tail || self.tail - len < self.head {
            return Err(self.exhausted(len));
        }

        self.tail -= len;
        self.track();
        tracing::trace!(offset = self.tail, len, "arena tail alloc");
        Ok(Span { offset: self.tail, len })
    }

    /// Allocates from the head and stores `value` there.
    ///
    /// # Errors
    ///
    /// [`CoreError::ArenaExhausted`] on exhaustion.
    pub fn alloc_head_pod<T: Pod>(&mut self, value: &T) -> CoreResult<Span> {
        let bytes = bytemuck::bytes_of(value);
        let span = self.alloc_head(bytes.len())?;
        self.storage[span.offset..span.offset + bytes.len()].copy_from_slice(bytes);
        Ok(span)
    }

    /// Allocates from the tail and stores `value` there.
    ///
    /// # Errors
    ///
    /// [`CoreError::ArenaExhausted`] on exhaustion.
    pub fn alloc_tail_pod<T: Pod>(&mut self, value: &T) -> CoreResult<Span> {
        let bytes = bytemuck::bytes_of(value);
        let span = self.alloc_tail(bytes.len())?;
        self.storage[span.offset..span.offset + bytes.len()].copy_from_slice(bytes);
        Ok(span)
    }

    /// Resets both cursors, invalidating every span handed out.
    ///
    /// This is a **zero-cost** operation - no memory is freed or reallocated.
    #[inline]
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = self.capacity();
        self.min_free = self.capacity();
        self.generation += 1;
    }

    /// Bytes of a span.
    ///
    /// # Panics
    ///
    /// Panics if the span does not lie within the arena.
    #[inline]
    #[must_use]
    pub fn bytes(&self, span: Span) -> &[u8] {
        &self.storage[span.offset..span.end()]
    }

    /// Mutable bytes of a span.
    ///
    /// # Panics
    ///
    /// Panics if the span does not lie within the arena.
    #[inline]
    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        &mut self.storage[span.offset..span.end()]
    }

    /// Whole backing storage.
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &[u8] {
        &self.storage
    }

    /// Physical address of an arena offset.
    #[inline]
    #[must_use]
    pub fn phys(&self, offset: usize) -> PhysAddr {
        // Capacity is validated to fit the 24-bit address space.
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u32;
        self.base.add(offset)
    }

    /// Returns true if `addr` falls inside this arena.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        self.offset_of(addr).is_some()
    }

    /// Arena offset of a physical address, if it lies inside the arena.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, addr: PhysAddr) -> Option<usize> {
        let rel = addr.get().checked_sub(self.base.get())? as usize;
        (rel < self.capacity()).then_some(rel)
    }

    fn aligned(&self, size: usize) -> CoreResult<usize> {
        align_up(size).ok_or(CoreError::ArenaExhausted {
            requested: size,
            head: self.head,
            tail: self.tail,
        })
    }

    fn exhausted(&self, requested: usize) -> CoreError {
        tracing::error!(
            requested,
            head = self.head,
            tail = self.tail,
            capacity = self.capacity(),
            "frame arena exhausted"
        );
        CoreError::ArenaExhausted {
            requested,
            head: self.head,
            tail: self.tail,
        }
    }

    fn track(&mut self) {
        let free = self.free();
        if free < self.min_free {
            // Crossing 90% usage is worth a single warning per frame.
            let threshold = self.capacity() / 10;
            if self.min_free >= threshold && free < threshold {
                tracing::warn!(free, capacity = self.capacity(), "frame arena above 90% usage");
            }
            self.min_free = free;
        }
    }
}

impl std::fmt::Debug for FrameArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameArena")
            .field("base", &self.base)
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("generation", &self.generation)
            .finish()
    }
}
