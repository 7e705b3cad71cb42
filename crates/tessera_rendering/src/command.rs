//! # Command Records
//!
//! Every command is one fixed-size record of two 32-bit words. The opcode
//! lives in the top byte of the first word.
//!
//! ```text
//!  w0: ┌────────┬──────────────────────────┐  w1: ┌──────────────────────────┐
//!      │ opcode │      immediate fields    │      │ address / immediate      │
//!      └────────┴──────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! Records are written through [`Command::encode`] and read back through
//! [`RawCommand::decode`]. Addresses in records are always segmented; the
//! consumer resolves them when it executes the record.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use tessera_core::{FrameArena, PhysAddr, SegAddr, SegmentId, COMMAND_SIZE};

/// Opcodes.
pub mod opcode {
    /// Does nothing.
    pub const NOOP: u8 = 0x00;
    /// Loads vertices into the consumer's vertex cache.
    pub const VERTEX: u8 = 0x01;
    /// Draws one triangle from cached vertices.
    pub const TRIANGLE: u8 = 0x05;
    /// Loads a background image.
    pub const BACKGROUND: u8 = 0x0A;
    /// Pops the modelview stack.
    pub const POP_MATRIX: u8 = 0xD8;
    /// Loads or multiplies a matrix.
    pub const MATRIX: u8 = 0xDA;
    /// Writes a segment table entry.
    pub const SET_SEGMENT: u8 = 0xDB;
    /// Loads a viewport.
    pub const VIEWPORT: u8 = 0xDC;
    /// Calls or branches to another list.
    pub const DISPLAY_LIST: u8 = 0xDE;
    /// Ends the current list.
    pub const END_LIST: u8 = 0xDF;
    /// Waits for the pipeline to drain.
    pub const PIPE_SYNC: u8 = 0xE7;
    /// Waits for all output to reach memory.
    pub const FULL_SYNC: u8 = 0xE9;
    /// Fills a screen rectangle.
    pub const FILL_RECT: u8 = 0xF6;
    /// Sets the primitive color.
    pub const PRIM_COLOR: u8 = 0xFA;
    /// Sets the depth image.
    pub const DEPTH_IMAGE: u8 = 0xFE;
    /// Sets the color image.
    pub const COLOR_IMAGE: u8 = 0xFF;
}

/// Matrix stack flags.
pub mod matrix_flags {
    /// Push the current matrix before applying.
    pub const PUSH: u8 = 0x01;
    /// Replace instead of multiply.
    pub const LOAD: u8 = 0x02;
    /// Target the projection matrix instead of modelview.
    pub const PROJECTION: u8 = 0x04;
}

const BRANCH_FLAG: u32 = 0x0001_0000;
const COORD_MASK: u32 = 0x0FFF;

/// Largest vertex count a single load accepts.
pub const MAX_VERTEX_LOAD: u8 = 32;

/// One encoded record as it sits in memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RawCommand {
    /// Opcode and immediates.
    pub w0: u32,
    /// Address or immediate.
    pub w1: u32,
}

/// A decoded command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Does nothing.
    Noop,
    /// Loads `count` vertices from `addr` into cache slots starting at `dest`.
    Vertex {
        /// Vertex array.
        addr: SegAddr,
        /// Number of vertices.
        count: u8,
        /// First cache slot.
        dest: u8,
    },
    /// Draws a triangle from three cache slots.
    Triangle {
        /// Cache slots.
        v: [u8; 3],
    },
    /// Applies a 4x4 matrix.
    Matrix {
        /// Matrix data.
        addr: SegAddr,
        /// Combination of [`matrix_flags`].
        flags: u8,
    },
    /// Pops `count` modelview matrices.
    PopMatrix {
        /// Number of matrices.
        count: u8,
    },
    /// Loads a viewport.
    Viewport {
        /// Viewport data.
        addr: SegAddr,
    },
    /// Writes a segment table entry.
    SetSegment {
        /// Segment written.
        id: SegmentId,
        /// New base.
        base: PhysAddr,
    },
    /// Executes another list and returns.
    CallList {
        /// Target list.
        addr: SegAddr,
    },
    /// Continues execution in another list without returning.
    BranchList {
        /// Target list.
        addr: SegAddr,
    },
    /// Ends the current list.
    EndList,
    /// Pipeline sync.
    PipeSync,
    /// Full sync. Output is in memory once this executes.
    FullSync,
    /// Sets the color image.
    SetColorImage {
        /// Image address.
        addr: SegAddr,
    },
    /// Sets the depth image.
    SetDepthImage {
        /// Image address.
        addr: SegAddr,
    },
    /// Sets the primitive color (RGBA8888).
    SetPrimColor {
        /// Packed color.
        rgba: u32,
    },
    /// Fills a rectangle with the primitive color. Coordinates are 12 bits.
    FillRect {
        /// Upper-left x.
        ulx: u16,
        /// Upper-left y.
        uly: u16,
        /// Lower-right x.
        lrx: u16,
        /// Lower-right y.
        lry: u16,
    },
    /// Draws a background image.
    Background {
        /// Image descriptor.
        addr: SegAddr,
    },
}

#[inline]
const fn word(op: u8, imm: u32) -> u32 {
    ((op as u32) << 24) | (imm & 0x00FF_FFFF)
}

impl Command {
    /// Encodes the command into a record.
    #[must_use]
    pub const fn encode(self) -> RawCommand {
        let (w0, w1) = match self {
            Self::Noop => (word(opcode::NOOP, 0), 0),
            Self::Vertex { addr, count, dest } => (
                word(opcode::VERTEX, ((count as u32) << 8) | dest as u32),
                addr.raw(),
            ),
            Self::Triangle { v } => (
                word(
                    opcode::TRIANGLE,
                    ((v[0] as u32) << 16) | ((v[1] as u32) << 8) | v[2] as u32,
                ),
                0,
            ),
            Self::Matrix { addr, flags } => (word(opcode::MATRIX, flags as u32), addr.raw()),
            Self::PopMatrix { count } => (word(opcode::POP_MATRIX, count as u32), 0),
            Self::Viewport { addr } => (word(opcode::VIEWPORT, 0), addr.raw()),
            Self::SetSegment { id, base } => (word(opcode::SET_SEGMENT, id.get() as u32), base.get()),
            Self::CallList { addr } => (word(opcode::DISPLAY_LIST, 0), addr.raw()),
            Self::BranchList { addr } => (word(opcode::DISPLAY_LIST, BRANCH_FLAG), addr.raw()),
            Self::EndList => (word(opcode::END_LIST, 0), 0),
            Self::PipeSync => (word(opcode::PIPE_SYNC, 0), 0),
            Self::FullSync => (word(opcode::FULL_SYNC, 0), 0),
            Self::SetColorImage { addr } => (word(opcode::COLOR_IMAGE, 0), addr.raw()),
            Self::SetDepthImage { addr } => (word(opcode::DEPTH_IMAGE, 0), addr.raw()),
            Self::SetPrimColor { rgba } => (word(opcode::PRIM_COLOR, 0), rgba),
            Self::FillRect { ulx, uly, lrx, lry } => (
                word(
                    opcode::FILL_RECT,
                    ((lrx as u32 & COORD_MASK) << 12) | (lry as u32 & COORD_MASK),
                ),
                ((ulx as u32 & COORD_MASK) << 12) | (uly as u32 & COORD_MASK),
            ),
            Self::Background { addr } => (word(opcode::BACKGROUND, 0), addr.raw()),
        };
        RawCommand { w0, w1 }
    }

    /// The segmented address the consumer resolves when executing this
    /// command, if any.
    #[must_use]
    pub const fn reference(&self) -> Option<SegAddr> {
        match *self {
            Self::Vertex { addr, .. }
            | Self::Matrix { addr, .. }
            | Self::Viewport { addr }
            | Self::CallList { addr }
            | Self::BranchList { addr }
            | Self::SetColorImage { addr }
            | Self::SetDepthImage { addr }
            | Self::Background { addr } => Some(addr),
            _ => None,
        }
    }

    /// Returns true for commands that end or leave the current list.
    #[inline]
    #[must_use]
    pub const fn ends_list(&self) -> bool {
        matches!(self, Self::EndList | Self::BranchList { .. })
    }
}

impl RawCommand {
    /// Decodes the record, returning `None` for unknown opcodes or invalid
    /// immediates.
    #[must_use]
    pub fn decode(self) -> Option<Command> {
        let op = (self.w0 >> 24) as u8;
        let imm = self.w0 & 0x00FF_FFFF;
        let addr = SegAddr::from_raw(self.w1);
        let byte = |shift: u32| ((imm >> shift) & 0xFF) as u8;

        let cmd = match op {
            opcode::NOOP => Command::Noop,
            opcode::VERTEX => Command::Vertex { addr, count: byte(8), dest: byte(0) },
            opcode::TRIANGLE => Command::Triangle { v: [byte(16), byte(8), byte(0)] },
            opcode::MATRIX => Command::Matrix { addr, flags: byte(0) },
            opcode::POP_MATRIX => Command::PopMatrix { count: byte(0) },
            opcode::VIEWPORT => Command::Viewport { addr },
            opcode::SET_SEGMENT => Command::SetSegment {
                id: SegmentId::new(byte(0))?,
                base: PhysAddr(self.w1),
            },
            opcode::DISPLAY_LIST if imm & BRANCH_FLAG != 0 => Command::BranchList { addr },
            opcode::DISPLAY_LIST => Command::CallList { addr },
            opcode::END_LIST => Command::EndList,
            opcode::PIPE_SYNC => Command::PipeSync,
            opcode::FULL_SYNC => Command::FullSync,
            opcode::COLOR_IMAGE => Command::SetColorImage { addr },
            opcode::DEPTH_IMAGE => Command::SetDepthImage { addr },
            opcode::PRIM_COLOR => Command::SetPrimColor { rgba: self.w1 },
            opcode::FILL_RECT => {
                let coord = |w: u32, shift: u32| ((w >> shift) & COORD_MASK) as u16;
                Command::FillRect {
                    ulx: coord(self.w1, 12),
                    uly: coord(self.w1, 0),
                    lrx: coord(imm, 12),
                    lry: coord(imm, 0),
                }
            }
            opcode::BACKGROUND => Command::Background { addr },
            _ => return None,
        };
        Some(cmd)
    }

    /// Reads the record at arena `offset`.
    ///
    /// Returns `None` if the record does not lie entirely inside the arena.
    #[inline]
    #[must_use]
    pub fn read(arena: &FrameArena, offset: usize) -> Option<Self> {
        let end = offset.checked_add(COMMAND_SIZE as usize)?;
        arena
            .storage()
            .get(offset..end)
            .map(bytemuck::pod_read_unaligned)
    }
}

impl From<Command> for RawCommand {
    fn from(cmd: Command) -> Self {
        cmd.encode()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Noop => write!(f, "noop"),
            Self::Vertex { addr, count, dest } => write!(f, "vtx {addr} n={count} dest={dest}"),
            Self::Triangle { v } => write!(f, "tri {} {} {}", v[0], v[1], v[2]),
            Self::Matrix { addr, flags } => {
                let push = if flags & matrix_flags::PUSH != 0 { "push" } else { "nopush" };
                let mode = if flags & matrix_flags::LOAD != 0 { "load" } else { "mul" };
                let target = if flags & matrix_flags::PROJECTION != 0 { "proj" } else { "mv" };
                write!(f, "mtx {addr} {target} {mode} {push}")
            }
            Self::PopMatrix { count } => write!(f, "popmtx {count}"),
            Self::Viewport { addr } => write!(f, "viewport {addr}"),
            Self::SetSegment { id, base } => write!(f, "segment {:#x} = {base}", id.get()),
            Self::CallList { addr } => write!(f, "call {addr}"),
            Self::BranchList { addr } => write!(f, "branch {addr}"),
            Self::EndList => write!(f, "end"),
            Self::PipeSync => write!(f, "pipesync"),
            Self::FullSync => write!(f, "fullsync"),
            Self::SetColorImage { addr } => write!(f, "colorimage {addr}"),
            Self::SetDepthImage { addr } => write!(f, "depthimage {addr}"),
            Self::SetPrimColor { rgba } => write!(f, "primcolor {rgba:#010x}"),
            Self::FillRect { ulx, uly, lrx, lry } => {
                write!(f, "fillrect ({ulx},{uly})-({lrx},{lry})")
            }
            Self::Background { addr } => write!(f, "bg {addr}"),
        }
    }
}

/// Vertex as the consumer reads it (16 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Vertex {
    /// Model-space position.
    pub position: [i16; 3],
    /// Reserved.
    pub flag: u16,
    /// Texture coordinates (S10.5).
    pub texcoord: [i16; 2],
    /// Color or normal, plus alpha.
    pub color: [u8; 4],
}

impl Vertex {
    /// Creates a vertex at `position` with `color`.
    #[must_use]
    pub const fn new(position: [i16; 3], color: [u8; 4]) -> Self {
        Self {
            position,
            flag: 0,
            texcoord: [0, 0],
            color,
        }
    }
}

/// Viewport scale and translation, in quarter pixels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Viewport {
    /// x, y, z, pad.
    pub scale: [i16; 4],
    /// x, y, z, pad.
    pub translate: [i16; 4],
}

impl Viewport {
    /// Viewport covering a `width` x `height` screen.
    #[must_use]
    pub fn for_screen(width: u16, height: u16) -> Self {
        let half_w = i16::try_from(u32::from(width) * 2).unwrap_or(i16::MAX);
        let half_h = i16::try_from(u32::from(height) * 2).unwrap_or(i16::MAX);
        Self {
            scale: [half_w, half_h, 0x1FF, 0],
            translate: [half_w, half_h, 0x1FF, 0],
        }
    }
}

/// Size of one record, as a `usize`.
pub(crate) const RECORD: usize = COMMAND_SIZE as usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<RawCommand>(), RECORD);
        assert_eq!(std::mem::size_of::<Vertex>(), 16);
        assert_eq!(std::mem::size_of::<Viewport>(), 16);
    }

    #[test]
    fn test_call_and_branch_share_opcode() {
        let target = SegAddr::new(SegmentId::ROOM, 0x80);
        let call = Command::CallList { addr: target }.encode();
        let branch = Command::BranchList { addr: target }.encode();
        assert_eq!(call.w0 >> 24, u32::from(opcode::DISPLAY_LIST));
        assert_eq!(branch.w0 >> 24, u32::from(opcode::DISPLAY_LIST));
        assert_eq!(call.decode(), Some(Command::CallList { addr: target }));
        assert_eq!(branch.decode(), Some(Command::BranchList { addr: target }));
    }

    #[test]
    fn test_segment_word_layout() {
        let raw = Command::SetSegment {
            id: SegmentId::OBJECT,
            base: PhysAddr(0x0012_3450),
        }
        .encode();
        assert_eq!(raw, RawCommand { w0: 0xDB00_0006, w1: 0x0012_3450 });
    }

    #[test]
    fn test_fill_rect_fields() {
        let cmd = Command::FillRect { ulx: 10, uly: 20, lrx: 310, lry: 230 };
        assert_eq!(cmd.encode().decode(), Some(cmd));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert_eq!(RawCommand { w0: 0x4200_0000, w1: 0 }.decode(), None);
        // Segment ids past the table are not valid either.
        assert_eq!(RawCommand { w0: 0xDB00_0010, w1: 0 }.decode(), None);
    }

    #[test]
    fn test_references() {
        let addr = SegAddr::new(SegmentId::OBJECT, 0x10);
        assert_eq!(Command::Vertex { addr, count: 3, dest: 0 }.reference(), Some(addr));
        assert_eq!(Command::Triangle { v: [0, 1, 2] }.reference(), None);
        assert!(Command::BranchList { addr }.ends_list());
        assert!(!Command::CallList { addr }.ends_list());
    }

    #[test]
    fn test_display() {
        let cmd = Command::CallList { addr: SegAddr::new(SegmentId::ROOM, 0x40) };
        assert_eq!(cmd.to_string(), "call 0x03000040");
    }
}
