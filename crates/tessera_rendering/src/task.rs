//! # Task Descriptors
//!
//! Everything the consumer needs to execute one frame, fixed at build time.

use std::fmt;

use tessera_core::{FrameArena, PhysAddr, Span};

/// Consumer program the task runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramRef {
    /// Name for logs.
    pub name: &'static str,
    /// Code image.
    pub text: PhysAddr,
    /// Code image size in bytes.
    pub text_size: u32,
    /// Data image.
    pub data: PhysAddr,
    /// Data image size in bytes.
    pub data_size: u32,
}

impl ProgramRef {
    /// Creates a program reference.
    #[must_use]
    pub const fn new(name: &'static str, text: PhysAddr, text_size: u32, data: PhysAddr, data_size: u32) -> Self {
        Self {
            name,
            text,
            text_size,
            data,
            data_size,
        }
    }
}

impl Default for ProgramRef {
    fn default() -> Self {
        Self::new("gfx", PhysAddr(0x0000_1000), 0x1000, PhysAddr(0x0000_2000), 0x800)
    }
}

/// A contiguous physical region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    /// First byte.
    pub addr: PhysAddr,
    /// Length in bytes.
    pub size: u32,
}

impl Region {
    /// Physical region of an arena span.
    #[must_use]
    pub fn of(arena: &FrameArena, span: Span) -> Self {
        Self {
            addr: arena.phys(span.offset),
            size: u32::try_from(span.len).unwrap_or(u32::MAX),
        }
    }

    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        self.addr.add(self.size)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.addr, self.size)
    }
}

/// Immutable description of one frame's work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskDescriptor {
    frame: u64,
    program: ProgramRef,
    data: Region,
    scratch: Region,
    output: Region,
    framebuffer: PhysAddr,
}

impl TaskDescriptor {
    /// Builds a descriptor.
    ///
    /// `data` is the Work buffer: the chain's entry point and its length,
    /// terminator included.
    #[must_use]
    pub const fn build(
        frame: u64,
        program: ProgramRef,
        data: Region,
        scratch: Region,
        output: Region,
        framebuffer: PhysAddr,
    ) -> Self {
        Self {
            frame,
            program,
            data,
            scratch,
            output,
            framebuffer,
        }
    }

    /// Frame this task renders.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Program the consumer runs.
    #[inline]
    #[must_use]
    pub const fn program(&self) -> &ProgramRef {
        &self.program
    }

    /// Entry point of the chain.
    #[inline]
    #[must_use]
    pub const fn data(&self) -> Region {
        self.data
    }

    /// Consumer scratch memory.
    #[inline]
    #[must_use]
    pub const fn scratch(&self) -> Region {
        self.scratch
    }

    /// Consumer output memory.
    #[inline]
    #[must_use]
    pub const fn output(&self) -> Region {
        self.output
    }

    /// Framebuffer rendered into.
    #[inline]
    #[must_use]
    pub const fn framebuffer(&self) -> PhysAddr {
        self.framebuffer
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} [{}] data {} scratch {} output {} fb {}",
            self.frame, self.program.name, self.data, self.scratch, self.output, self.framebuffer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_of_span() {
        let arena = FrameArena::new(PhysAddr(0x0010_0000), 0x1000);
        let region = Region::of(&arena, Span { offset: 0x200, len: 0x40 });
        assert_eq!(region.addr, PhysAddr(0x0010_0200));
        assert_eq!(region.end(), PhysAddr(0x0010_0240));
    }

    #[test]
    fn test_descriptor_fields() {
        let data = Region { addr: PhysAddr(0x0010_0000), size: 0x38 };
        let task = TaskDescriptor::build(
            7,
            ProgramRef::default(),
            data,
            Region::default(),
            Region::default(),
            PhysAddr(0x0022_5800),
        );
        assert_eq!(task.frame(), 7);
        assert_eq!(task.data(), data);
        assert_eq!(task.program().name, "gfx");
        assert!(task.to_string().starts_with("frame 7 [gfx]"));
    }
}
