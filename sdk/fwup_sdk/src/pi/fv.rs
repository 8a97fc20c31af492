//! Firmware Volume (FV) Definitions
//!
//! Based on the values defined in the UEFI Platform Initialization (PI) Specification V1.8A 3.1 Firmware Storage
//! Code Definitions.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

/// Firmware File System revision number
pub const FFS_REVISION: u8 = 2;

/// `_FVH` in little endian byte order.
pub const SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

/// Size of the fixed part of `EFI_FIRMWARE_VOLUME_HEADER`, excluding the block map.
pub const HEADER_SIZE: usize = 0x38;

/// Size of one block map entry.
pub const BLOCK_MAP_ENTRY_SIZE: usize = 8;

/// Offset of the header checksum within `EFI_FIRMWARE_VOLUME_HEADER`.
pub const CHECKSUM_OFFSET: usize = 0x32;

mod raw {
    pub(super) mod write_policy {
        pub const UNRELIABLE_WRITE: u32 = 0x00000000;
        pub const RELIABLE_WRITE: u32 = 0x00000001;
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Firmware volume write policy enumeration
pub enum WritePolicy {
    /// Unreliable write - no guarantees on power loss
    UnreliableWrite = raw::write_policy::UNRELIABLE_WRITE,
    /// Reliable write - atomic on power loss
    ReliableWrite = raw::write_policy::RELIABLE_WRITE,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Firmware volume block map entry describing physical layout
pub struct BlockMapEntry {
    /// Number of blocks of this size
    pub num_blocks: u32,
    /// Length of each block
    pub length: u32,
}

impl BlockMapEntry {
    /// Creates a run of `num_blocks` blocks of `length` bytes.
    pub const fn new(num_blocks: u32, length: u32) -> Self {
        Self { num_blocks, length }
    }

    /// `true` for the `(0,0)` entry that terminates a block map.
    pub const fn is_terminator(&self) -> bool {
        self.num_blocks == 0 && self.length == 0
    }

    /// Number of bytes covered by this run.
    pub const fn run_size(&self) -> u64 {
        self.num_blocks as u64 * self.length as u64
    }
}
