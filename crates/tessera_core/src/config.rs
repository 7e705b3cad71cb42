//! # Frame Configuration
//!
//! Memory layout of the frame pools and the consumer's fixed resources,
//! loaded once at startup from TOML.
//!
//! ```toml
//! arena_size = 262144
//! arena_bases = [0x100000, 0x140000]
//! work_buffer_size = 4096
//! opaque_buffer_size = 65536
//! translucent_buffer_size = 32768
//! overlay_buffer_size = 16384
//! framebuffers = [0x200000, 0x225800]
//! depth_buffer = 0x24B000
//! consumer_timeout_ms = 1000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::{PhysAddr, PHYS_ADDR_LIMIT};
use crate::error::{CoreError, CoreResult};
use crate::memory::ARENA_ALIGN;

/// Bytes per command record.
pub const COMMAND_SIZE: u32 = 8;

/// Records every buffer keeps back for its chain terminator.
pub const TERMINATOR_RECORDS: u32 = 3;

/// Layout and policy for frame construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    /// Size of every frame arena, in bytes.
    pub arena_size: u32,
    /// Physical base of each arena pool. Two pools double-buffer the build.
    pub arena_bases: Vec<u32>,
    /// Work buffer size, in bytes.
    pub work_buffer_size: u32,
    /// Opaque geometry buffer size, in bytes.
    pub opaque_buffer_size: u32,
    /// Translucent geometry buffer size, in bytes.
    pub translucent_buffer_size: u32,
    /// Overlay buffer size, in bytes.
    pub overlay_buffer_size: u32,
    /// Consumer scratch region handed over with each task.
    pub task_scratch_size: u32,
    /// Consumer output region handed over with each task.
    pub task_output_size: u32,
    /// The two framebuffers rendered to on alternating frames.
    pub framebuffers: [u32; 2],
    /// Depth buffer shared by every frame.
    pub depth_buffer: u32,
    /// How long to wait for a completion signal before declaring the consumer hung.
    pub consumer_timeout_ms: u64,
    /// Check segment references against the set tracking.
    pub validate_segments: bool,
    /// Check buffer bounds on close.
    pub validate_bounds: bool,
    /// Capacity of the per-frame depth list.
    pub max_cull_entries: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            arena_size: 0x0004_0000,
            arena_bases: vec![0x0010_0000, 0x0014_0000],
            work_buffer_size: 0x1000,
            opaque_buffer_size: 0x0001_0000,
            translucent_buffer_size: 0x8000,
            overlay_buffer_size: 0x4000,
            task_scratch_size: 0x400,
            task_output_size: 0x3000,
            framebuffers: [0x0020_0000, 0x0022_5800],
            depth_buffer: 0x0024_B000,
            consumer_timeout_ms: 1000,
            validate_segments: cfg!(debug_assertions),
            validate_bounds: cfg!(debug_assertions),
            max_cull_entries: 64,
        }
    }
}

impl FrameConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConfigParse`] on malformed TOML, or any error from
    /// [`FrameConfig::validate`].
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| CoreError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConfigIo`] if the file cannot be read, otherwise as
    /// [`FrameConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigIo(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConfigParse`] if serialization fails.
    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string(self).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }

    /// Bytes carved from every arena before any drawing routine runs.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        [
            self.work_buffer_size,
            self.opaque_buffer_size,
            self.translucent_buffer_size,
            self.overlay_buffer_size,
            self.task_scratch_size,
            self.task_output_size,
        ]
        .iter()
        .map(|&s| u64::from(s))
        .sum()
    }

    /// Physical base addresses of the arena pools.
    #[must_use]
    pub fn pool_bases(&self) -> Vec<PhysAddr> {
        self.arena_bases.iter().copied().map(PhysAddr).collect()
    }

    /// Framebuffer targeted by `frame`.
    #[inline]
    #[must_use]
    pub fn framebuffer_for(&self, frame: u64) -> PhysAddr {
        PhysAddr(self.framebuffers[usize::from(frame % 2 == 1)])
    }

    /// Checks the layout for consistency.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        let align = ARENA_ALIGN as u32;
        if self.arena_size == 0 || self.arena_size % align != 0 {
            return Err(invalid(format!(
                "arena_size {:#x} must be a non-zero multiple of {align}",
                self.arena_size
            )));
        }
        if self.arena_bases.is_empty() {
            return Err(invalid("at least one arena pool is required".into()));
        }

        let buffers = [
            ("work_buffer_size", self.work_buffer_size),
            ("opaque_buffer_size", self.opaque_buffer_size),
            ("translucent_buffer_size", self.translucent_buffer_size),
            ("overlay_buffer_size", self.overlay_buffer_size),
        ];
        let minimum = COMMAND_SIZE * (TERMINATOR_RECORDS + 1);
        for (name, size) in buffers {
            if size < minimum || size % COMMAND_SIZE != 0 {
                return Err(invalid(format!(
                    "{name} {size:#x} must be a multiple of {COMMAND_SIZE} and at least {minimum}"
                )));
            }
        }

        if self.reserved_bytes() > u64::from(self.arena_size) {
            return Err(invalid(format!(
                "buffers and task regions need {:#x} bytes but the arena holds {:#x}",
                self.reserved_bytes(),
                self.arena_size
            )));
        }

        let mut pools: Vec<(u64, u64)> = Vec::with_capacity(self.arena_bases.len());
        for &base in &self.arena_bases {
            let start = u64::from(base);
            let end = start + u64::from(self.arena_size);
            if base % align != 0 {
                return Err(invalid(format!("arena base {base:#x} is not {align}-byte aligned")));
            }
            if end > u64::from(PHYS_ADDR_LIMIT) {
                return Err(invalid(format!(
                    "arena at {base:#x} ends past the {PHYS_ADDR_LIMIT:#x} address limit"
                )));
            }
            if pools.iter().any(|&(s, e)| start < e && s < end) {
                return Err(invalid(format!("arena at {base:#x} overlaps another pool")));
            }
            pools.push((start, end));
        }

        for addr in self.framebuffers.iter().chain(std::iter::once(&self.depth_buffer)) {
            if *addr >= PHYS_ADDR_LIMIT {
                return Err(invalid(format!("address {addr:#x} is outside the physical address space")));
            }
        }

        if self.max_cull_entries == 0 {
            return Err(invalid("max_cull_entries must be non-zero".into()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> CoreError {
    CoreError::InvalidConfig(message)
}
