//! Support for the Firmware File System as described in the UEFI Platform Initialization Specification.
//!
//! The update components need three things from a firmware volume image:
//!
//! - header validation and the block map, to drive block level writes ([`volume::VolumeHeader`]),
//! - file and section lookup inside an update image ([`store::FfsFileStore`]),
//! - composition of volumes, files and sections, to assemble images ([`volume::Volume`], [`file::File`],
//!   [`section::Section`]).
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod err;
pub mod file;
pub mod section;
pub mod store;
pub mod volume;

pub use err::FirmwareFileSystemError;

/// Rounds `value` up to a multiple of `alignment`, which must be a power of two.
pub(crate) fn align_up(value: usize, alignment: usize) -> Result<usize, FirmwareFileSystemError> {
    value.checked_add(alignment - 1).map(|v| v & !(alignment - 1)).ok_or(FirmwareFileSystemError::DataCorrupt)
}
