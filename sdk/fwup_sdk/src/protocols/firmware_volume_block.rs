//! Firmware Volume Block (FVB) Service
//!
//! The Firmware Volume Block service is the low-level interface to a firmware volume. It erases, reads and writes
//! blocks addressed by logical block address (LBA) and reports the volume's attributes.
//!
//! See <https://uefi.org/specs/PI/1.8A/V3_Code_Definitions.html#efi-firmware-volume-block2-protocol>.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use crate::{error::Result, pi::fvb::EfiFvbAttributes2};

/// Logical block address within a firmware volume.
pub type Lba = u64;

/// Identifies one block device instance to services that act on it indirectly, such as the fault tolerant write
/// journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FvbHandle(pub usize);

/// Block level access to a firmware volume.
///
/// All offsets are relative to the start of the addressed block.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait FirmwareVolumeBlock {
    /// Returns the current attributes and capabilities of the volume.
    fn get_attributes(&self) -> Result<EfiFvbAttributes2>;

    /// Changes the status bits of the volume attributes and returns the resulting attributes.
    fn set_attributes(&self, attributes: EfiFvbAttributes2) -> Result<EfiFvbAttributes2>;

    /// Returns the physical base address of a memory mapped volume.
    fn get_physical_address(&self) -> Result<u64>;

    /// Returns the length of the block at `lba` and the number of blocks of that length starting at `lba`.
    fn get_block_size(&self, lba: Lba) -> Result<(usize, usize)>;

    /// Reads from `lba` at `offset` into `buffer`.
    ///
    /// A read crossing the end of the block stops at the block end and returns the number of bytes read.
    fn read(&self, lba: Lba, offset: usize, buffer: &mut [u8]) -> Result<usize>;

    /// Writes `data` to `lba` at `offset`, returning the number of bytes written.
    ///
    /// The target bytes must have been erased. A write crossing the end of the block is truncated.
    fn write(&self, lba: Lba, offset: usize, data: &[u8]) -> Result<usize>;

    /// Erases each `(starting lba, block count)` range.
    ///
    /// All ranges are validated before any block is erased.
    fn erase_blocks(&self, ranges: &[(Lba, usize)]) -> Result<()>;
}
