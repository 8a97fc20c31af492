//! SPI Firmware Volume Block Service
//!
//! One [`SpiFvbInstance`] is created for every configured firmware volume that holds a valid header. Instances
//! translate `(lba, offset)` into a physical flash address through the volume's block map and share the identified
//! [`SpiFlash`] and a single scratch buffer sized to the largest block across all volumes.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{rc::Rc, vec::Vec};
use core::cell::{Cell, RefCell};

use fwup_ffs::volume::VolumeHeader;
use fwup_sdk::{
    block_map,
    error::{EfiError, Result},
    pi::{
        fv::{self, BlockMapEntry},
        fvb::{fvb2, EfiFvbAttributes2},
    },
    protocols::firmware_volume_block::{FirmwareVolumeBlock, FvbHandle, Lba},
};

use crate::{config::SpiFlashConfig, flash::SpiFlash, spi::SpiController};

/// The flash block service: the identified flash and the volumes it serves.
pub struct SpiFvbModule<'a> {
    instances: Vec<SpiFvbInstance<'a>>,
}

impl<'a> SpiFvbModule<'a> {
    /// Identifies the flash part and creates an instance for every volume in `config.volumes`.
    ///
    /// Volumes without a valid header are skipped. Instance handles are the volume's index in `config.volumes`.
    ///
    /// Errors
    /// - [`EfiError::Unsupported`]: the flash part is not in `config.supported_parts`.
    pub fn initialize(controller: &'a dyn SpiController, config: &SpiFlashConfig) -> Result<Self> {
        let flash = Rc::new(SpiFlash::identify(controller, config)?);

        let mut volumes = Vec::new();
        for (index, &base_address) in config.volumes.iter().enumerate() {
            match read_volume_header(&flash, base_address) {
                Ok(header) => volumes.push((FvbHandle(index), base_address, header)),
                Err(err) => {
                    log::warn!(target: "spi_fvb", "No volume at {:#x}: {:?}", base_address, err);
                }
            }
        }

        let scratch_length =
            volumes.iter().map(|(_, _, header)| block_map::max_block_length(header.block_map())).max().unwrap_or(0);
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(scratch_length).map_err(|_| EfiError::OutOfResources)?;
        scratch.resize(scratch_length, 0u8);
        let scratch = Rc::new(RefCell::new(scratch));

        let instances = volumes
            .into_iter()
            .map(|(handle, base_address, header)| {
                log::info!(
                    target: "spi_fvb",
                    "{:?}: volume at {:#x}, {:#x} bytes, attributes {:#x}",
                    handle,
                    base_address,
                    header.fv_length(),
                    header.attributes()
                );
                SpiFvbInstance {
                    flash: flash.clone(),
                    handle,
                    base_address,
                    fv_length: header.fv_length(),
                    block_map: header.block_map().to_vec(),
                    attributes: Cell::new(header.attributes()),
                    scratch: scratch.clone(),
                }
            })
            .collect();

        Ok(Self { instances })
    }

    /// The volumes being served.
    pub fn instances(&self) -> &[SpiFvbInstance<'a>] {
        &self.instances
    }
}

fn read_volume_header(flash: &SpiFlash, base_address: u64) -> Result<VolumeHeader> {
    let mut fixed = [0u8; fv::HEADER_SIZE];
    flash.read(base_address, &mut fixed)?;
    let header_length = u16::from_le_bytes([fixed[0x30], fixed[0x31]]) as usize;
    if header_length < fv::HEADER_SIZE + fv::BLOCK_MAP_ENTRY_SIZE {
        Err(EfiError::VolumeCorrupted)?;
    }

    let mut raw_header = Vec::new();
    raw_header.try_reserve_exact(header_length).map_err(|_| EfiError::OutOfResources)?;
    raw_header.resize(header_length, 0u8);
    flash.read(base_address, &mut raw_header)?;

    let header = VolumeHeader::parse(&raw_header)?;
    if !flash.contains(base_address, block_map::volume_size(header.block_map())) {
        log::error!(target: "spi_fvb", "Volume at {:#x} extends past the end of flash", base_address);
        Err(EfiError::VolumeCorrupted)?;
    }
    Ok(header)
}

/// Validates a `SetAttributes` request against the current attributes and returns the resulting attributes.
///
/// Only [`fvb2::STATUS`] bits may change, and only to states the capability bits allow. A locked volume accepts no
/// status change at all.
pub fn apply_attribute_change(
    current: EfiFvbAttributes2,
    requested: EfiFvbAttributes2,
) -> Result<EfiFvbAttributes2> {
    if current & fvb2::LOCK_STATUS != 0 && (current ^ requested) & fvb2::STATUS != 0 {
        Err(EfiError::AccessDenied)?;
    }
    if (current ^ requested) & !fvb2::STATUS != 0 {
        Err(EfiError::InvalidParameter)?;
    }

    let rules = [
        (fvb2::READ_STATUS, current & fvb2::READ_DISABLED_CAP != 0, current & fvb2::READ_ENABLED_CAP != 0),
        (fvb2::WRITE_STATUS, current & fvb2::WRITE_DISABLED_CAP != 0, current & fvb2::WRITE_ENABLED_CAP != 0),
        (fvb2::LOCK_STATUS, true, current & fvb2::LOCK_CAP != 0),
        (fvb2::READ_LOCK_STATUS, true, current & fvb2::READ_LOCK_CAP != 0),
        (fvb2::WRITE_LOCK_STATUS, true, current & fvb2::WRITE_LOCK_CAP != 0),
    ];
    for (status, can_clear, can_set) in rules {
        let set = requested & status != 0;
        if (set && !can_set) || (!set && !can_clear) {
            Err(EfiError::InvalidParameter)?;
        }
    }

    Ok((current & !fvb2::STATUS) | (requested & fvb2::STATUS))
}

/// Block access to one firmware volume on SPI flash.
pub struct SpiFvbInstance<'a> {
    flash: Rc<SpiFlash<'a>>,
    handle: FvbHandle,
    base_address: u64,
    fv_length: u64,
    block_map: Vec<BlockMapEntry>,
    attributes: Cell<EfiFvbAttributes2>,
    scratch: Rc<RefCell<Vec<u8>>>,
}

impl SpiFvbInstance<'_> {
    /// Handle identifying this instance.
    pub fn handle(&self) -> FvbHandle {
        self.handle
    }

    /// `FvLength` from the volume header.
    pub fn fv_length(&self) -> u64 {
        self.fv_length
    }

    /// Block map of the volume, without the `(0,0)` terminator.
    pub fn block_map(&self) -> &[BlockMapEntry] {
        &self.block_map
    }

    /// Resolves `(lba, offset)` to a physical address and the number of bytes left in the block from there.
    fn resolve(&self, lba: Lba, offset: usize) -> Result<(u64, usize)> {
        let info = block_map::lba_info(&self.block_map, lba)?;
        if offset >= info.block_length {
            log::error!(target: "spi_fvb", "{:?}: offset {:#x} beyond block {} of {:#x} bytes", self.handle, offset, lba, info.block_length);
            Err(EfiError::InvalidParameter)?;
        }
        Ok((self.base_address + info.offset + offset as u64, info.block_length - offset))
    }

    fn require(&self, status: EfiFvbAttributes2) -> Result<()> {
        if self.attributes.get() & status == 0 {
            log::error!(target: "spi_fvb", "{:?}: access denied, attributes {:#x}", self.handle, self.attributes.get());
            Err(EfiError::AccessDenied)?;
        }
        Ok(())
    }

    fn erase_block(&self, lba: Lba) -> Result<()> {
        let info = block_map::lba_info(&self.block_map, lba)?;
        log::debug!(target: "spi_fvb", "{:?}: erasing block {}", self.handle, lba);
        self.flash.erase(self.base_address + info.offset, info.block_length)
    }

    /// Erases the bytes from `(start_lba, start_offset)` through `(end_lba, end_offset)` inclusive.
    ///
    /// The bytes before `start_offset` in the first block and after `end_offset` in the last block are preserved:
    /// each partial block is copied to the scratch buffer, erased, and the preserved bytes are programmed back.
    ///
    /// Errors
    /// - [`EfiError::InvalidParameter`]: the range is empty, reversed, or outside the volume.
    /// - [`EfiError::AccessDenied`]: the volume is not writable.
    pub fn erase_custom_block_range(
        &self,
        start_lba: Lba,
        start_offset: usize,
        end_lba: Lba,
        end_offset: usize,
    ) -> Result<()> {
        self.require(fvb2::WRITE_STATUS)?;
        self.resolve(start_lba, start_offset)?;
        self.resolve(end_lba, end_offset)?;
        if (end_lba, end_offset) < (start_lba, start_offset) {
            Err(EfiError::InvalidParameter)?;
        }

        for lba in start_lba..=end_lba {
            let info = block_map::lba_info(&self.block_map, lba)?;
            let block_address = self.base_address + info.offset;
            let keep_before = if lba == start_lba { start_offset } else { 0 };
            let keep_from = if lba == end_lba { end_offset + 1 } else { info.block_length };

            if keep_before == 0 && keep_from == info.block_length {
                self.erase_block(lba)?;
                continue;
            }

            log::debug!(
                target: "spi_fvb",
                "{:?}: partial erase of block {} [{:#x}, {:#x})",
                self.handle,
                lba,
                keep_before,
                keep_from
            );
            let mut scratch = self.scratch.borrow_mut();
            let saved = &mut scratch[..info.block_length];
            self.flash.read(block_address, saved)?;
            self.flash.erase(block_address, info.block_length)?;
            if keep_before > 0 {
                self.flash.program(block_address, &saved[..keep_before])?;
            }
            if keep_from < info.block_length {
                self.flash.program(block_address + keep_from as u64, &saved[keep_from..])?;
            }
        }
        Ok(())
    }
}

impl FirmwareVolumeBlock for SpiFvbInstance<'_> {
    fn get_attributes(&self) -> Result<EfiFvbAttributes2> {
        Ok(self.attributes.get())
    }

    fn set_attributes(&self, attributes: EfiFvbAttributes2) -> Result<EfiFvbAttributes2> {
        let updated = apply_attribute_change(self.attributes.get(), attributes).inspect_err(|err| {
            log::error!(target: "spi_fvb", "{:?}: attributes {:#x} rejected: {:?}", self.handle, attributes, err);
        })?;
        self.attributes.set(updated);
        Ok(updated)
    }

    fn get_physical_address(&self) -> Result<u64> {
        Ok(self.base_address)
    }

    fn get_block_size(&self, lba: Lba) -> Result<(usize, usize)> {
        let info = block_map::lba_info(&self.block_map, lba)?;
        Ok((info.block_length, info.remaining_blocks))
    }

    fn read(&self, lba: Lba, offset: usize, buffer: &mut [u8]) -> Result<usize> {
        self.require(fvb2::READ_STATUS)?;
        let (address, available) = self.resolve(lba, offset)?;
        let length = buffer.len().min(available);
        self.flash.read(address, &mut buffer[..length])?;
        Ok(length)
    }

    fn write(&self, lba: Lba, offset: usize, data: &[u8]) -> Result<usize> {
        self.require(fvb2::WRITE_STATUS)?;
        let (address, available) = self.resolve(lba, offset)?;
        let length = data.len().min(available);
        if length < data.len() {
            log::warn!(target: "spi_fvb", "{:?}: write to block {} truncated to {:#x} bytes", self.handle, lba, length);
        }

        log::debug!(target: "spi_fvb", "{:?}: writing {:#x} bytes at block {} offset {:#x}", self.handle, length, lba, offset);
        self.flash.program(address, &data[..length])?;

        let mut scratch = self.scratch.borrow_mut();
        let written = &mut scratch[..length];
        self.flash.read(address, written)?;
        if *written != data[..length] {
            log::error!(target: "spi_fvb", "{:?}: verify failed at block {} offset {:#x}", self.handle, lba, offset);
            Err(EfiError::DeviceError)?;
        }
        Ok(length)
    }

    fn erase_blocks(&self, ranges: &[(Lba, usize)]) -> Result<()> {
        self.require(fvb2::WRITE_STATUS)?;
        let total_blocks = block_map::total_blocks(&self.block_map);
        if ranges.is_empty() {
            Err(EfiError::InvalidParameter)?;
        }
        for &(lba, count) in ranges {
            let in_range = lba.checked_add(count as u64).is_some_and(|end| end <= total_blocks);
            if count == 0 || !in_range {
                log::error!(target: "spi_fvb", "{:?}: erase range ({}, {}) outside {} blocks", self.handle, lba, count, total_blocks);
                Err(EfiError::InvalidParameter)?;
            }
        }

        for &(lba, count) in ranges {
            for block in lba..lba + count as u64 {
                self.erase_block(block)?;
            }
        }
        Ok(())
    }
}
