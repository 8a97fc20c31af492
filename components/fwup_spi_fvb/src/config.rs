//! SPI Flash Configuration
//!
//! Platform description of the flash device: where it is mapped, which firmware volumes it holds, and the parts it may
//! be populated with.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{vec, vec::Vec};

use crate::spi::{opcode, OpcodeType, SpiOpcode, OPCODE_MENU_SIZE};

/// Menu indices of the operations the flash service issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeIndices {
    /// Data read.
    pub read: usize,
    /// Page program.
    pub write: usize,
    /// Erase of one [`SpiFlashPart::erase_size`] unit.
    pub erase: usize,
    /// Status register read.
    pub read_status: usize,
    /// JEDEC id read.
    pub read_id: usize,
}

/// One supported SPI flash part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiFlashPart {
    /// Marketing name, for logs.
    pub name: &'static str,
    /// JEDEC manufacturer id.
    pub vendor_id: u8,
    /// JEDEC memory type and capacity.
    pub device_id: u16,
    /// Prefix opcodes. Index 0 must be write enable.
    pub prefix_opcodes: [u8; 2],
    /// Opcode menu programmed into the controller.
    pub opcode_menu: [SpiOpcode; OPCODE_MENU_SIZE],
    /// Where each operation sits in `opcode_menu`.
    pub indices: OpcodeIndices,
    /// Bytes erased by the erase opcode.
    pub erase_size: usize,
    /// Program operations may not cross a boundary of this size.
    pub page_size: usize,
}

/// Menu shared by the standard parts.
pub const STANDARD_OPCODE_MENU: [SpiOpcode; OPCODE_MENU_SIZE] = [
    SpiOpcode::new(opcode::READ_JEDEC_ID, OpcodeType::ReadNoAddress),
    SpiOpcode::new(opcode::SECTOR_ERASE, OpcodeType::WriteWithAddress),
    SpiOpcode::new(opcode::READ, OpcodeType::ReadWithAddress),
    SpiOpcode::new(opcode::READ_STATUS, OpcodeType::ReadNoAddress),
    SpiOpcode::new(opcode::WRITE_STATUS, OpcodeType::WriteNoAddress),
    SpiOpcode::new(opcode::PAGE_PROGRAM, OpcodeType::WriteWithAddress),
    SpiOpcode::new(opcode::FAST_READ, OpcodeType::ReadWithAddress),
    SpiOpcode::new(opcode::BLOCK_ERASE, OpcodeType::WriteWithAddress),
];

/// Indices into [`STANDARD_OPCODE_MENU`].
pub const STANDARD_OPCODE_INDICES: OpcodeIndices =
    OpcodeIndices { read: 2, write: 5, erase: 1, read_status: 3, read_id: 0 };

/// Prefix opcodes of the standard parts.
pub const STANDARD_PREFIX_OPCODES: [u8; 2] = [opcode::WRITE_ENABLE, opcode::ENABLE_WRITE_STATUS];

impl SpiFlashPart {
    /// A part using the standard opcode menu with 4 KiB sectors and 256 byte pages.
    pub const fn standard(name: &'static str, vendor_id: u8, device_id: u16) -> Self {
        Self {
            name,
            vendor_id,
            device_id,
            prefix_opcodes: STANDARD_PREFIX_OPCODES,
            opcode_menu: STANDARD_OPCODE_MENU,
            indices: STANDARD_OPCODE_INDICES,
            erase_size: 0x1000,
            page_size: 0x100,
        }
    }
}

/// Parts recognized when the platform does not supply its own list.
pub fn default_parts() -> Vec<SpiFlashPart> {
    vec![
        SpiFlashPart::standard("W25Q64", 0xEF, 0x4017),
        SpiFlashPart::standard("W25Q128", 0xEF, 0x4018),
        SpiFlashPart::standard("MX25L6405", 0xC2, 0x2017),
        SpiFlashPart::standard("MX25L12805", 0xC2, 0x2018),
        // Byte program only.
        SpiFlashPart { page_size: 1, ..SpiFlashPart::standard("SST25VF016B", 0xBF, 0x2541) },
    ]
}

/// SPI flash service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiFlashConfig {
    /// Physical address the flash is mapped at.
    pub flash_base: u64,
    /// Bytes of flash mapped at `flash_base`.
    pub flash_size: u64,
    /// Physical base addresses of the firmware volumes to serve.
    pub volumes: Vec<u64>,
    /// Parts matched against the JEDEC id.
    pub supported_parts: Vec<SpiFlashPart>,
    /// Status reads allowed while waiting for a program or erase to finish.
    pub status_poll_limit: usize,
}

impl Default for SpiFlashConfig {
    fn default() -> Self {
        SpiFlashConfig {
            flash_base: 0xFF00_0000,
            flash_size: 0x100_0000,
            volumes: Vec::new(),
            supported_parts: default_parts(),
            status_poll_limit: 0x10_0000,
        }
    }
}
