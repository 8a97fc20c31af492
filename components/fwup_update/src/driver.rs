//! Update Driver Entry
//!
//! Reads the update profile out of the update image, applies every update it lists and, when all succeed, asks the
//! platform for a cold reset. A failure leaves the system running without a reset.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use fwup_sdk::{
    error::Result,
    guid::FmtGuid,
    pi::ffs::section_type,
    protocols::{fault_tolerant_write::FaultTolerantWrite, firmware_volume::FirmwareVolume},
};

use crate::{
    config::UpdateDriverConfig, dispatcher::UpdateDispatcher, flash_update::FlashUpdater, platform::UpdatePlatform,
    profile::parse_update_profile, registry::FlashRegistry,
};

/// The firmware volume update driver.
pub struct UpdateDriver<'a> {
    config: UpdateDriverConfig,
    image: &'a dyn FirmwareVolume,
    registry: &'a FlashRegistry<'a>,
    ftw: Option<&'a dyn FaultTolerantWrite>,
    platform: &'a dyn UpdatePlatform,
}

impl<'a> UpdateDriver<'a> {
    /// Creates the driver over the update `image` and the flash regions in `registry`.
    ///
    /// Fault tolerant updates fail with `NotFound` when `ftw` is `None`.
    pub fn new(
        config: UpdateDriverConfig,
        image: &'a dyn FirmwareVolume,
        registry: &'a FlashRegistry<'a>,
        ftw: Option<&'a dyn FaultTolerantWrite>,
        platform: &'a dyn UpdatePlatform,
    ) -> Self {
        Self { config, image, registry, ftw, platform }
    }

    /// Runs the update.
    pub fn run(&self) -> Result<()> {
        log::info!(target: "fw_update", "Reading update profile {}", FmtGuid(&self.config.config_file_guid));
        let profile = self.image.read_section(&self.config.config_file_guid, section_type::RAW, 0).inspect_err(|err| {
            log::error!(target: "fw_update", "Update profile unavailable: {:?}", err);
        })?;

        let descriptors = parse_update_profile(&profile, self.config.initial_line_length).inspect_err(|err| {
            log::error!(target: "fw_update", "Update profile rejected: {}", err);
        })?;

        let updater = FlashUpdater::new(self.ftw, self.config.caller_id);
        UpdateDispatcher::new(self.registry, self.image, &updater, self.platform).dispatch(&descriptors)?;

        if self.config.reset_on_success {
            log::info!(target: "fw_update", "Firmware updated, resetting to apply");
            self.platform.reset_cold();
        }
        Ok(())
    }
}
