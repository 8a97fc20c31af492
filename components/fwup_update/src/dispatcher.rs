//! Update Dispatcher
//!
//! Applies a batch of [`UpdateDescriptor`]s in order. The first failing update stops the batch; updates after it
//! are not attempted.
//!
//! | Update type | Target lookup | Payload |
//! |---|---|---|
//! | [`UpdateType::WholeVolume`] | exact volume base address | first firmware volume image section of the file |
//! | [`UpdateType::VolumeFile`] | exact volume base address | the file itself, written into the volume file system |
//! | [`UpdateType::FlashRange`] | volume containing each address | the first `Length` bytes of a RAW file |
//!
//! Every successful block level update is followed by a reinstall of the mutated volume's block interface.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use fwup_sdk::{
    error::{EfiError, Result},
    guid::FmtGuid,
    pi::{
        ffs::{file_type, section_type},
        fv::WritePolicy,
    },
    protocols::firmware_volume::FirmwareVolume,
};

use crate::{
    flash_update::FlashUpdater,
    platform::UpdatePlatform,
    profile::{UpdateDescriptor, UpdateType},
    registry::FlashRegistry,
};

/// File types that execute before memory is available and cannot be relocated by a file level update.
const REJECTED_FILE_TYPES: [u8; 4] =
    [file_type::SECURITY_CORE, file_type::PEI_CORE, file_type::PEIM, file_type::COMBINED_PEIM_DRIVER];

/// Drives a batch of updates against the registered flash regions.
pub struct UpdateDispatcher<'a> {
    registry: &'a FlashRegistry<'a>,
    image: &'a dyn FirmwareVolume,
    updater: &'a FlashUpdater<'a>,
    platform: &'a dyn UpdatePlatform,
}

impl<'a> UpdateDispatcher<'a> {
    /// Creates a dispatcher reading payloads from the update `image`.
    pub fn new(
        registry: &'a FlashRegistry<'a>,
        image: &'a dyn FirmwareVolume,
        updater: &'a FlashUpdater<'a>,
        platform: &'a dyn UpdatePlatform,
    ) -> Self {
        Self { registry, image, updater, platform }
    }

    /// Applies `descriptors` in order, stopping at the first failure.
    pub fn dispatch(&self, descriptors: &[UpdateDescriptor]) -> Result<()> {
        for (position, descriptor) in descriptors.iter().enumerate() {
            log::info!(target: "fw_update", "Applying {}", descriptor);
            self.apply(descriptor).inspect_err(|err| {
                log::error!(
                    target: "fw_update",
                    "Update{} failed: {:?}. Skipping the remaining {} updates.",
                    descriptor.index,
                    err,
                    descriptors.len() - position - 1
                );
            })?;
        }
        log::info!(target: "fw_update", "All {} updates applied", descriptors.len());
        Ok(())
    }

    /// Applies a single update.
    pub fn apply(&self, descriptor: &UpdateDescriptor) -> Result<()> {
        match descriptor.update_type {
            UpdateType::WholeVolume => self.update_whole_volume(descriptor),
            UpdateType::VolumeFile => self.update_volume_file(descriptor),
            UpdateType::FlashRange => self.update_flash_range(descriptor),
        }
    }

    fn update_whole_volume(&self, descriptor: &UpdateDescriptor) -> Result<()> {
        let region = self.registry.find_by_base(descriptor.base_address)?;
        let image = self.image.read_section(&descriptor.file_guid, section_type::FIRMWARE_VOLUME_IMAGE, 0).inspect_err(
            |err| {
                log::error!(
                    target: "fw_update",
                    "No volume image section in {}: {:?}",
                    FmtGuid(&descriptor.file_guid),
                    err
                );
            },
        )?;

        self.updater.update_firmware_volume(region, &image, &descriptor.file_guid, descriptor.fault_tolerant)?;
        self.platform.reinstall_volume_block(region.handle)
    }

    fn update_volume_file(&self, descriptor: &UpdateDescriptor) -> Result<()> {
        let region = self.registry.find_by_base(descriptor.base_address)?;
        let file = self.image.read_file(&descriptor.file_guid)?;

        if REJECTED_FILE_TYPES.contains(&file.file_type) {
            log::error!(
                target: "fw_update",
                "{} has file type {:#x}, which cannot be updated as a volume file",
                FmtGuid(&descriptor.file_guid),
                file.file_type
            );
            Err(EfiError::Unsupported)?;
        }

        let Some(file_store) = region.file_store else {
            log::error!(target: "fw_update", "Volume at {:#x} has no writable file system", region.base_address);
            return Err(EfiError::NotFound);
        };

        let policy = if descriptor.fault_tolerant { WritePolicy::ReliableWrite } else { WritePolicy::UnreliableWrite };
        log::debug!(
            target: "fw_update",
            "Writing {} ({:#x} bytes, type {:#x}) with {:?}",
            FmtGuid(&descriptor.file_guid),
            file.data.len(),
            file.file_type,
            policy
        );
        file_store.write_file(&descriptor.file_guid, file.file_type, file.attributes, &file.data, policy)
    }

    fn update_flash_range(&self, descriptor: &UpdateDescriptor) -> Result<()> {
        let file = self.image.read_file(&descriptor.file_guid)?;
        if file.file_type != file_type::RAW {
            log::error!(
                target: "fw_update",
                "Flash range payload {} has file type {:#x}, expected RAW",
                FmtGuid(&descriptor.file_guid),
                file.file_type
            );
            Err(EfiError::InvalidParameter)?;
        }

        let length = usize::try_from(descriptor.length).map_err(|_| EfiError::InvalidParameter)?;
        if file.data.len() < length {
            log::error!(
                target: "fw_update",
                "Flash range payload has {:#x} bytes, {:#x} requested",
                file.data.len(),
                length
            );
            Err(EfiError::InvalidParameter)?;
        }

        let mut address = descriptor.base_address;
        let mut remaining = &file.data[..length];
        while !remaining.is_empty() {
            let region = self.registry.find_containing(address)?;
            let updated = self.updater.update_flash_area(
                region,
                address,
                remaining,
                &descriptor.file_guid,
                descriptor.fault_tolerant,
            )?;
            self.platform.reinstall_volume_block(region.handle)?;

            address += updated as u64;
            remaining = &remaining[updated..];
        }
        Ok(())
    }
}
