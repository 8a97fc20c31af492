//! Update Driver Configuration
//!
//! Platform-fixed settings of the update driver. The defaults match the update images produced by the standard
//! packaging tools: the profile is stored under [`CONFIG_FILE_GUID`] and journal records are tagged with
//! [`UPDATE_DRIVER_GUID`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use r_efi::efi;

/// Identity of the update driver, used as the owner of fault tolerant write transactions.
pub const UPDATE_DRIVER_GUID: efi::Guid =
    efi::Guid::from_fields(0x0e84fc69, 0x29cc, 0x4c6d, 0x92, 0xac, &[0x6d, 0x47, 0x69, 0x21, 0x85, 0x0f]);

/// Name of the update image file whose RAW section holds the update profile.
pub const CONFIG_FILE_GUID: efi::Guid =
    efi::Guid::from_fields(0x283fa2ee, 0x532c, 0x484d, 0x93, 0x83, &[0x9f, 0x93, 0xb3, 0x6f, 0x0b, 0x7e]);

/// Default size of the line buffer the profile parser starts with.
pub const DEFAULT_LINE_LENGTH: usize = 512;

/// Update driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDriverConfig {
    /// Owner identity recorded with every fault tolerant write.
    pub caller_id: efi::Guid,
    /// File in the update image holding the update profile.
    pub config_file_guid: efi::Guid,
    /// Request a cold reset once every update succeeded.
    pub reset_on_success: bool,
    /// Initial line buffer size of the profile parser. Longer lines grow the buffer.
    pub initial_line_length: usize,
}

impl Default for UpdateDriverConfig {
    fn default() -> Self {
        UpdateDriverConfig {
            caller_id: UPDATE_DRIVER_GUID,
            config_file_guid: CONFIG_FILE_GUID,
            reset_on_success: true,
            initial_line_length: DEFAULT_LINE_LENGTH,
        }
    }
}
