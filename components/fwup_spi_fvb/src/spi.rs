//! SPI Controller Interface
//!
//! The controller is opcode-table driven: it is programmed once with two prefix opcodes and an eight entry opcode
//! menu, and every bus cycle afterwards names its opcode by menu index.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use fwup_sdk::error::Result;

/// Number of entries in the opcode menu.
pub const OPCODE_MENU_SIZE: usize = 8;

/// Common SPI NOR opcodes.
pub mod opcode {
    /// Write enable.
    pub const WRITE_ENABLE: u8 = 0x06;
    /// Enable write status register.
    pub const ENABLE_WRITE_STATUS: u8 = 0x50;
    /// JEDEC manufacturer and device id.
    pub const READ_JEDEC_ID: u8 = 0x9F;
    /// Read data.
    pub const READ: u8 = 0x03;
    /// Read data at higher clock rates.
    pub const FAST_READ: u8 = 0x0B;
    /// Read status register.
    pub const READ_STATUS: u8 = 0x05;
    /// Write status register.
    pub const WRITE_STATUS: u8 = 0x01;
    /// Program up to one page.
    pub const PAGE_PROGRAM: u8 = 0x02;
    /// Erase a 4 KiB sector.
    pub const SECTOR_ERASE: u8 = 0x20;
    /// Erase a 64 KiB block.
    pub const BLOCK_ERASE: u8 = 0xD8;
}

/// Status register write-in-progress bit.
pub const STATUS_BUSY: u8 = 0x01;

/// Bus cycle shape of a menu opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeType {
    /// Reads data without sending an address.
    ReadNoAddress,
    /// Writes data without sending an address.
    WriteNoAddress,
    /// Sends an address then reads data.
    ReadWithAddress,
    /// Sends an address then writes data, or nothing for erase.
    WriteWithAddress,
}

/// One opcode menu entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiOpcode {
    /// Opcode byte sent on the bus.
    pub opcode: u8,
    /// Cycle shape.
    pub kind: OpcodeType,
}

impl SpiOpcode {
    /// Creates a menu entry.
    pub const fn new(opcode: u8, kind: OpcodeType) -> Self {
        Self { opcode, kind }
    }
}

/// One bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiCommand {
    /// Index of the opcode in the menu.
    pub opcode_index: usize,
    /// Index of the prefix opcode sent first, if any.
    pub prefix_index: Option<usize>,
    /// The transaction carries data.
    pub data_cycle: bool,
    /// Prefix and opcode are sent back to back without releasing the bus.
    pub atomic: bool,
    /// Data is shifted out to the part rather than in from it.
    pub shift_out: bool,
    /// Linear flash offset, ignored by opcodes without an address.
    pub address: u32,
}

/// Access to a SPI host controller.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait SpiController {
    /// Programs the prefix opcodes and the opcode menu.
    fn configure(&self, prefix_opcodes: [u8; 2], opcode_menu: [SpiOpcode; OPCODE_MENU_SIZE]) -> Result<()>;

    /// Largest data transfer of a single command.
    fn max_transfer_size(&self) -> usize;

    /// Runs one transaction. `data` is sent when `command.shift_out` is set and filled otherwise.
    fn execute(&self, command: &SpiCommand, data: &mut [u8]) -> Result<()>;
}
