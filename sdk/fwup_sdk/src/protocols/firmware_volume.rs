//! Firmware Volume (FV) Service
//!
//! File level access to a firmware volume. Update images are read through it, and volume-file updates are written
//! through it.
//!
//! See <https://uefi.org/specs/PI/1.8A/V3_Code_Definitions.html#efi-firmware-volume2-protocol>.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use alloc::vec::Vec;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::{error::Result, pi::fv::WritePolicy};

/// The content of a file together with its header metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File content following the file header.
    pub data: Vec<u8>,
    /// `EFI_FV_FILETYPE_*`
    pub file_type: u8,
    /// `FFS_ATTRIB_*`
    pub attributes: u8,
}

/// File level access to one firmware volume.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait FirmwareVolume {
    /// Reads the whole file named `name`.
    fn read_file(&self, name: &efi::Guid) -> Result<FileInfo>;

    /// Reads the content of the `instance`th section of `section_type` in the file named `name`.
    fn read_section(&self, name: &efi::Guid, section_type: u8, instance: usize) -> Result<Vec<u8>>;

    /// Adds or replaces the file named `name` in the volume.
    fn write_file(
        &self,
        name: &efi::Guid,
        file_type: u8,
        attributes: u8,
        data: &[u8],
        policy: WritePolicy,
    ) -> Result<()>;
}
