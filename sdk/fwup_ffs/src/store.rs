//! In-memory firmware volume file store.
//!
//! [`FfsFileStore`] serves [`FirmwareVolume`] reads from a complete FV image held in memory, such as the update image
//! volume carrying the update profile and payload files. It is read-only.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use alloc::vec::Vec;

use fwup_sdk::{
    error::{EfiError, Result},
    guid::FmtGuid,
    pi::fv::WritePolicy,
    protocols::firmware_volume::{FileInfo, FirmwareVolume},
};
use r_efi::efi;

use crate::{volume::VolumeRef, FirmwareFileSystemError};

/// Read-only [`FirmwareVolume`] over an owned FV image.
#[derive(Debug, Clone)]
pub struct FfsFileStore {
    image: Vec<u8>,
}

impl FfsFileStore {
    /// Takes ownership of `image` after validating its header.
    pub fn new(image: Vec<u8>) -> core::result::Result<Self, FirmwareFileSystemError> {
        VolumeRef::new(&image)?;
        Ok(Self { image })
    }

    /// The underlying image.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    fn volume(&self) -> core::result::Result<VolumeRef<'_>, FirmwareFileSystemError> {
        VolumeRef::new(&self.image)
    }
}

impl FirmwareVolume for FfsFileStore {
    fn read_file(&self, name: &efi::Guid) -> Result<FileInfo> {
        let volume = self.volume()?;
        let file = volume.find_file(name)?;
        let content = file.content();

        let mut data = Vec::new();
        data.try_reserve_exact(content.len()).map_err(|_| EfiError::OutOfResources)?;
        data.extend_from_slice(content);

        Ok(FileInfo { data, file_type: file.file_type_raw(), attributes: file.attributes_raw() })
    }

    fn read_section(&self, name: &efi::Guid, section_type: u8, instance: usize) -> Result<Vec<u8>> {
        let volume = self.volume()?;
        let file = volume.find_file(name)?;

        let mut matches = 0;
        for section in file.sections() {
            let section = section?;
            if section.section_type() != section_type {
                continue;
            }
            if matches == instance {
                let mut data = Vec::new();
                data.try_reserve_exact(section.content().len()).map_err(|_| EfiError::OutOfResources)?;
                data.extend_from_slice(section.content());
                return Ok(data);
            }
            matches += 1;
        }

        log::debug!(
            target: "ffs",
            "File {} has no section of type {:#x} instance {}",
            FmtGuid(name),
            section_type,
            instance
        );
        Err(EfiError::NotFound)
    }

    fn write_file(
        &self,
        name: &efi::Guid,
        _file_type: u8,
        _attributes: u8,
        _data: &[u8],
        _policy: WritePolicy,
    ) -> Result<()> {
        log::error!(target: "ffs", "Write of {} rejected: in-memory volume is read-only", FmtGuid(name));
        Err(EfiError::WriteProtected)
    }
}
