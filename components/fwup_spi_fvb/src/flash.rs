//! SPI Flash Access
//!
//! [`SpiFlash`] reads, programs and erases the flash part by physical address. Program and erase are preceded by the
//! write enable prefix opcode and followed by polling the status register until the part is idle.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;

use fwup_sdk::error::{EfiError, Result};

use crate::{
    config::{SpiFlashConfig, SpiFlashPart, STANDARD_OPCODE_INDICES, STANDARD_OPCODE_MENU, STANDARD_PREFIX_OPCODES},
    spi::{SpiCommand, SpiController, STATUS_BUSY},
};

const WRITE_ENABLE_PREFIX: usize = 0;
const JEDEC_ID_LENGTH: usize = 3;

/// An identified SPI flash part.
pub struct SpiFlash<'a> {
    controller: &'a dyn SpiController,
    part: SpiFlashPart,
    flash_base: u64,
    flash_size: u64,
    status_poll_limit: usize,
}

impl<'a> SpiFlash<'a> {
    /// Reads the JEDEC id through the standard opcode menu and programs the controller with the matching part's
    /// tables.
    ///
    /// Errors
    /// - [`EfiError::Unsupported`]: no part in `config.supported_parts` matches the id.
    pub fn identify(controller: &'a dyn SpiController, config: &SpiFlashConfig) -> Result<Self> {
        controller.configure(STANDARD_PREFIX_OPCODES, STANDARD_OPCODE_MENU)?;

        let mut id = [0u8; JEDEC_ID_LENGTH];
        let command = SpiCommand {
            opcode_index: STANDARD_OPCODE_INDICES.read_id,
            prefix_index: None,
            data_cycle: true,
            atomic: false,
            shift_out: false,
            address: 0,
        };
        controller.execute(&command, &mut id)?;

        let vendor_id = id[0];
        let device_id = u16::from_be_bytes([id[1], id[2]]);
        let Some(part) =
            config.supported_parts.iter().find(|part| part.vendor_id == vendor_id && part.device_id == device_id)
        else {
            log::error!(target: "spi_fvb", "Unsupported flash part {:#04x} {:#06x}", vendor_id, device_id);
            return Err(EfiError::Unsupported);
        };

        log::info!(target: "spi_fvb", "Flash part {} ({:#04x} {:#06x})", part.name, vendor_id, device_id);
        controller.configure(part.prefix_opcodes, part.opcode_menu)?;

        Ok(Self {
            controller,
            part: part.clone(),
            flash_base: config.flash_base,
            flash_size: config.flash_size,
            status_poll_limit: config.status_poll_limit,
        })
    }

    /// The identified part.
    pub fn part(&self) -> &SpiFlashPart {
        &self.part
    }

    /// Returns true when `[address, address + length)` lies inside the mapped flash.
    pub fn contains(&self, address: u64, length: u64) -> bool {
        address
            .checked_sub(self.flash_base)
            .and_then(|offset| offset.checked_add(length))
            .is_some_and(|end| end <= self.flash_size)
    }

    fn offset_of(&self, address: u64, length: u64) -> Result<u32> {
        if !self.contains(address, length) {
            log::error!(target: "spi_fvb", "Access {:#x}+{:#x} outside flash", address, length);
            Err(EfiError::InvalidParameter)?;
        }
        u32::try_from(address - self.flash_base).map_err(|_| EfiError::InvalidParameter)
    }

    fn transfer_size(&self) -> usize {
        self.controller.max_transfer_size().max(1)
    }

    /// Reads `buffer.len()` bytes at physical `address`.
    pub fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(address, buffer.len() as u64)?;
        let transfer_size = self.transfer_size();

        let mut done = 0;
        for chunk in buffer.chunks_mut(transfer_size) {
            let command = SpiCommand {
                opcode_index: self.part.indices.read,
                prefix_index: None,
                data_cycle: true,
                atomic: false,
                shift_out: false,
                address: offset + done as u32,
            };
            done += chunk.len();
            self.controller.execute(&command, chunk)?;
        }
        Ok(())
    }

    /// Programs `data` at physical `address`. The range must have been erased.
    pub fn program(&self, address: u64, data: &[u8]) -> Result<()> {
        let mut offset = self.offset_of(address, data.len() as u64)?;
        let page_size = self.part.page_size.max(1);
        let chunk_limit = self.transfer_size().min(page_size);

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(chunk_limit).map_err(|_| EfiError::OutOfResources)?;
        buffer.resize(chunk_limit, 0u8);

        let mut remaining = data;
        while !remaining.is_empty() {
            let page_left = page_size - offset as usize % page_size;
            let length = remaining.len().min(page_left).min(chunk_limit);
            buffer[..length].copy_from_slice(&remaining[..length]);

            let command = SpiCommand {
                opcode_index: self.part.indices.write,
                prefix_index: Some(WRITE_ENABLE_PREFIX),
                data_cycle: true,
                atomic: true,
                shift_out: true,
                address: offset,
            };
            self.controller.execute(&command, &mut buffer[..length])?;
            self.wait_ready()?;

            offset += length as u32;
            remaining = &remaining[length..];
        }
        Ok(())
    }

    /// Erases `length` bytes at physical `address`. Both must be multiples of the part's erase size.
    pub fn erase(&self, address: u64, length: usize) -> Result<()> {
        let offset = self.offset_of(address, length as u64)?;
        let erase_size = self.part.erase_size;
        if erase_size == 0 || offset as usize % erase_size != 0 || length % erase_size != 0 {
            log::error!(target: "spi_fvb", "Erase {:#x}+{:#x} not aligned to {:#x}", address, length, erase_size);
            Err(EfiError::InvalidParameter)?;
        }

        for sector in (0..length).step_by(erase_size) {
            log::trace!(target: "spi_fvb", "Erasing sector at {:#x}", offset as usize + sector);
            let command = SpiCommand {
                opcode_index: self.part.indices.erase,
                prefix_index: Some(WRITE_ENABLE_PREFIX),
                data_cycle: false,
                atomic: true,
                shift_out: false,
                address: offset + sector as u32,
            };
            self.controller.execute(&command, &mut [])?;
            self.wait_ready()?;
        }
        Ok(())
    }

    fn wait_ready(&self) -> Result<()> {
        let command = SpiCommand {
            opcode_index: self.part.indices.read_status,
            prefix_index: None,
            data_cycle: true,
            atomic: false,
            shift_out: false,
            address: 0,
        };
        let mut status = [0u8; 1];
        for _ in 0..self.status_poll_limit {
            self.controller.execute(&command, &mut status)?;
            if status[0] & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        log::error!(target: "spi_fvb", "Flash still busy after {} status reads", self.status_poll_limit);
        Err(EfiError::Timeout)
    }
}
