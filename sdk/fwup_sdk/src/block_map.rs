//! Block map translation
//!
//! A firmware volume describes its physical layout as an ordered list of `(num_blocks, length)` runs terminated by a
//! `(0,0)` entry. Logical block addresses (LBAs) number the blocks from zero across all runs, so translating between
//! a byte offset and an LBA always walks the runs cumulatively.
//!
//! Both directions are provided:
//!
//! - [`locate`]: byte offset from the volume start to `(lba, offset in block, block length, blocks left in run)`.
//! - [`lba_info`]: LBA to `(byte offset of the block, block length, blocks left in run)`.
//!
//! ## Examples
//!
//! ```rust
//! use fwup_sdk::block_map;
//! use fwup_sdk::pi::fv::BlockMapEntry;
//!
//! let map = [BlockMapEntry::new(4, 0x1000), BlockMapEntry::new(0, 0)];
//! let location = block_map::locate(&map, 0x3500).unwrap();
//! assert_eq!((location.lba, location.offset, location.block_length), (3, 0x500, 0x1000));
//! ```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use crate::{error::EfiError, pi::fv::BlockMapEntry, protocols::firmware_volume_block::Lba};

/// Errors produced while translating through a block map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMapError {
    /// The byte offset or LBA lies beyond the mapped size of the volume.
    OutOfRange,
}

impl From<BlockMapError> for EfiError {
    fn from(err: BlockMapError) -> Self {
        match err {
            BlockMapError::OutOfRange => EfiError::InvalidParameter,
        }
    }
}

/// Position of a byte within the block layout of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Block holding the byte.
    pub lba: Lba,
    /// Offset of the byte within the block.
    pub offset: usize,
    /// Length of the block.
    pub block_length: usize,
    /// Blocks left in the run, counting this one.
    pub remaining_blocks: usize,
}

/// Placement of one logical block within a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbaInfo {
    /// Byte offset of the block from the start of the volume.
    pub offset: u64,
    /// Length of the block.
    pub block_length: usize,
    /// Blocks left in the run, counting this one.
    pub remaining_blocks: usize,
}

fn runs(block_map: &[BlockMapEntry]) -> impl Iterator<Item = &BlockMapEntry> {
    block_map.iter().take_while(|entry| !entry.is_terminator())
}

/// Translates a byte offset from the start of the volume into its block location.
pub fn locate(block_map: &[BlockMapEntry], offset: u64) -> Result<Location, BlockMapError> {
    let mut start_lba: Lba = 0;
    let mut run_offset: u64 = 0;

    for entry in runs(block_map) {
        let run_size = entry.run_size();
        if entry.length != 0 && offset < run_offset + run_size {
            let index_in_run = (offset - run_offset) / entry.length as u64;
            return Ok(Location {
                lba: start_lba + index_in_run,
                offset: ((offset - run_offset) % entry.length as u64) as usize,
                block_length: entry.length as usize,
                remaining_blocks: (entry.num_blocks as u64 - index_in_run) as usize,
            });
        }
        start_lba += entry.num_blocks as u64;
        run_offset += run_size;
    }

    Err(BlockMapError::OutOfRange)
}

/// Returns the byte offset, length and remaining run size of the given block.
pub fn lba_info(block_map: &[BlockMapEntry], lba: Lba) -> Result<LbaInfo, BlockMapError> {
    let mut start_lba: Lba = 0;
    let mut run_offset: u64 = 0;

    for entry in runs(block_map) {
        let end_lba = start_lba + entry.num_blocks as u64;
        if lba < end_lba {
            let index_in_run = lba - start_lba;
            return Ok(LbaInfo {
                offset: run_offset + index_in_run * entry.length as u64,
                block_length: entry.length as usize,
                remaining_blocks: (end_lba - lba) as usize,
            });
        }
        start_lba = end_lba;
        run_offset += entry.run_size();
    }

    Err(BlockMapError::OutOfRange)
}

/// Total number of bytes described by the block map.
pub fn volume_size(block_map: &[BlockMapEntry]) -> u64 {
    runs(block_map).map(BlockMapEntry::run_size).sum()
}

/// Total number of blocks described by the block map.
pub fn total_blocks(block_map: &[BlockMapEntry]) -> u64 {
    runs(block_map).map(|entry| entry.num_blocks as u64).sum()
}

/// Largest block length in the block map, zero for an empty map.
pub fn max_block_length(block_map: &[BlockMapEntry]) -> usize {
    runs(block_map).filter(|entry| entry.num_blocks != 0).map(|entry| entry.length as usize).max().unwrap_or(0)
}

/// Iterates every block of the volume in ascending LBA order.
pub fn blocks(block_map: &[BlockMapEntry]) -> impl Iterator<Item = (Lba, LbaInfo)> + '_ {
    let mut lba: Lba = 0;
    let mut offset: u64 = 0;
    runs(block_map).flat_map(move |entry| {
        let run_start_lba = lba;
        let run_start_offset = offset;
        lba += entry.num_blocks as u64;
        offset += entry.run_size();
        (0..entry.num_blocks as u64).map(move |i| {
            (
                run_start_lba + i,
                LbaInfo {
                    offset: run_start_offset + i * entry.length as u64,
                    block_length: entry.length as usize,
                    remaining_blocks: (entry.num_blocks as u64 - i) as usize,
                },
            )
        })
    })
}
