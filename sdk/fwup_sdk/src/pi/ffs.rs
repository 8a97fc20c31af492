//! Firmware File System (FFS) Definitions
//!
//! Based on the values defined in the UEFI Platform Initialization (PI) Specification V1.8A Section 3.2.2 and 3.2.3
//! Firmware File System and Firmware File Section formats.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use r_efi::efi;

/// EFI_FIRMWARE_FILE_SYSTEM2_GUID
pub const FFS2_GUID: efi::Guid =
    efi::Guid::from_fields(0x8c8ce578, 0x8a3d, 0x4f1c, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3]);

/// EFI_FIRMWARE_FILE_SYSTEM3_GUID
pub const FFS3_GUID: efi::Guid =
    efi::Guid::from_fields(0x5473c07a, 0x3dcb, 0x4dca, 0xbd, 0x6f, &[0x1e, 0x96, 0x89, 0xe7, 0x34, 0x9a]);

/// File header sizes.
pub mod header {
    /// EFI_FFS_FILE_HEADER
    pub const SIZE: usize = 24;
    /// EFI_FFS_FILE_HEADER2
    pub const LARGE_SIZE: usize = 32;
    /// Checksum value used when `ATTRIBUTES_CHECKSUM` is clear.
    pub const FILE_CHECKSUM_NOT_COMPUTED: u8 = 0xAA;
}

/// File State Bits
pub mod state {
    /// File header is under construction
    pub const HEADER_CONSTRUCTION: u8 = 0x01;
    /// File header is valid
    pub const HEADER_VALID: u8 = 0x02;
    /// File data is valid
    pub const DATA_VALID: u8 = 0x04;
    /// File is marked for update
    pub const MARKED_FOR_UPDATE: u8 = 0x08;
    /// File has been deleted
    pub const DELETED: u8 = 0x10;
    /// File header is invalid
    pub const HEADER_INVALID: u8 = 0x20;
}

/// File Attribute Bits
pub mod attributes {
    /// File uses EFI_FFS_FILE_HEADER2
    pub const LARGE_FILE: u8 = 0x01;
    /// File data alignment bit 2
    pub const DATA_ALIGNMENT_2: u8 = 0x02;
    /// File is fixed in the volume
    pub const FIXED: u8 = 0x04;
    /// File data alignment
    pub const DATA_ALIGNMENT: u8 = 0x38;
    /// File data checksum is valid
    pub const CHECKSUM: u8 = 0x40;
}

/// File Type Definitions
pub mod file_type {
    /// Raw data file
    pub const RAW: u8 = 0x01;
    /// Freeform file
    pub const FREEFORM: u8 = 0x02;
    /// Security (SEC) core file
    pub const SECURITY_CORE: u8 = 0x03;
    /// PEI core file
    pub const PEI_CORE: u8 = 0x04;
    /// DXE core file
    pub const DXE_CORE: u8 = 0x05;
    /// Pre-EFI module (PEIM) file
    pub const PEIM: u8 = 0x06;
    /// Driver Execution Environment (DXE) driver file
    pub const DRIVER: u8 = 0x07;
    /// Combined PEIM and driver file
    pub const COMBINED_PEIM_DRIVER: u8 = 0x08;
    /// Application file
    pub const APPLICATION: u8 = 0x09;
    /// Firmware volume image file
    pub const FIRMWARE_VOLUME_IMAGE: u8 = 0x0B;
    /// Pad file
    pub const FFS_PAD: u8 = 0xF0;
}

/// Section Type Definitions
pub mod section_type {
    /// PE32 image section
    pub const PE32: u8 = 0x10;
    /// User interface section
    pub const USER_INTERFACE: u8 = 0x15;
    /// Firmware volume image section
    pub const FIRMWARE_VOLUME_IMAGE: u8 = 0x17;
    /// Raw section
    pub const RAW: u8 = 0x19;
}

/// Section header sizes.
pub mod section_header {
    /// EFI_COMMON_SECTION_HEADER
    pub const SIZE: usize = 4;
    /// EFI_COMMON_SECTION_HEADER2
    pub const EXTENDED_SIZE: usize = 8;
    /// Size field value indicating an EFI_COMMON_SECTION_HEADER2.
    pub const EXTENDED_SIZE_MARKER: u32 = 0x00FF_FFFF;
}
