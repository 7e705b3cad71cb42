//! Depth-ordered list of visible groups.
//!
//! Entries live in one preallocated vector and are linked by index, nearest
//! first. Insertion walks from the head and places the new entry after every
//! entry of equal or smaller depth, so equal depths keep insertion order.

use tessera_core::SegAddr;

use super::engine::BoundingSphere;

/// One visible group for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullEntry {
    /// Index of the group in the slice that was culled.
    pub group: usize,
    /// World-space bounds.
    pub bounds: BoundingSphere,
    /// Distance in front of the camera.
    pub depth: f32,
    /// Opaque list, if any.
    pub opaque: Option<SegAddr>,
    /// Translucent list, if any.
    pub translucent: Option<SegAddr>,
    next: Option<u16>,
}

impl CullEntry {
    /// Creates an unlinked entry.
    #[must_use]
    pub const fn new(
        group: usize,
        bounds: BoundingSphere,
        depth: f32,
        opaque: Option<SegAddr>,
        translucent: Option<SegAddr>,
    ) -> Self {
        Self {
            group,
            bounds,
            depth,
            opaque,
            translucent,
            next: None,
        }
    }
}

/// Fixed-capacity list sorted by ascending depth.
#[derive(Debug, Clone)]
pub struct DepthList {
    entries: Vec<CullEntry>,
    head: Option<u16>,
    capacity: usize,
}

impl DepthList {
    /// Creates an empty list holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit the 16-bit link index.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= usize::from(u16::MAX), "depth list capacity {capacity} too large");
        Self {
            entries: Vec::with_capacity(capacity),
            head: None,
            capacity,
        }
    }

    /// Empties the list, keeping its storage.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = None;
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the list is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts in depth order. Returns false, leaving the list unchanged,
    /// when it is full.
    pub fn insert(&mut self, mut entry: CullEntry) -> bool {
        let Ok(index) = u16::try_from(self.entries.len()) else {
            return false;
        };
        if self.entries.len() >= self.capacity {
            return false;
        }

        let mut prev: Option<u16> = None;
        let mut cur = self.head;
        while let Some(i) = cur {
            let e = &self.entries[usize::from(i)];
            if e.depth > entry.depth {
                break;
            }
            prev = cur;
            cur = e.next;
        }

        entry.next = cur;
        self.entries.push(entry);
        match prev {
            Some(p) => self.entries[usize::from(p)].next = Some(index),
            None => self.head = Some(index),
        }
        true
    }

    /// Entries nearest first.
    #[must_use]
    pub fn iter(&self) -> DepthIter<'_> {
        DepthIter {
            entries: &self.entries,
            cur: self.head,
        }
    }
}

impl<'a> IntoIterator for &'a DepthList {
    type Item = &'a CullEntry;
    type IntoIter = DepthIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`DepthList`], nearest first.
pub struct DepthIter<'a> {
    entries: &'a [CullEntry],
    cur: Option<u16>,
}

impl<'a> Iterator for DepthIter<'a> {
    type Item = &'a CullEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(usize::from(self.cur?))?;
        self.cur = entry.next;
        Some(entry)
    }
}
