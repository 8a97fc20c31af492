//! Flash Region Registry
//!
//! Tracks the firmware volume block devices an update may target. Each device is described by the header of the
//! firmware volume it backs: the physical base address comes from the device and the block map and length come from
//! the volume header read through the device itself.
//!
//! A region is write capable when the device currently reports [`fvb2::WRITE_STATUS`]. Lookups only consider write
//! capable regions; the attributes are re-read on every lookup so a volume locked after registration is skipped.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::fmt;

use fwup_ffs::volume::VolumeHeader;
use fwup_sdk::{
    block_map,
    error::{EfiError, Result},
    pi::{fv, fv::BlockMapEntry, fvb::fvb2},
    protocols::{
        firmware_volume::FirmwareVolume,
        firmware_volume_block::{FirmwareVolumeBlock, FvbHandle},
    },
};

/// A flash region backing one firmware volume.
pub struct FlashRegion<'a> {
    /// Handle passed to the fault tolerant write service for this device.
    pub handle: FvbHandle,
    /// Physical address of the first byte of the volume.
    pub base_address: u64,
    /// `FvLength` from the volume header.
    pub fv_length: u64,
    /// Block map from the volume header, without the `(0,0)` terminator.
    pub block_map: Vec<BlockMapEntry>,
    /// Block device of the volume.
    pub device: &'a dyn FirmwareVolumeBlock,
    /// File system of the volume, when one is available for file level writes.
    pub file_store: Option<&'a dyn FirmwareVolume>,
}

impl FlashRegion<'_> {
    /// Bytes mapped by the block map.
    pub fn size(&self) -> u64 {
        block_map::volume_size(&self.block_map)
    }

    /// Exclusive end address of the region.
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.size())
    }

    /// Returns true when `address` lies inside the region.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// Returns true when the device currently allows writes.
    pub fn is_write_capable(&self) -> bool {
        match self.device.get_attributes() {
            Ok(attributes) => attributes & fvb2::WRITE_STATUS != 0,
            Err(err) => {
                log::warn!(target: "fw_update", "{:?}: attributes unavailable: {:?}", self.handle, err);
                false
            }
        }
    }
}

impl fmt::Debug for FlashRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashRegion")
            .field("handle", &self.handle)
            .field("base_address", &format_args!("{:#x}", self.base_address))
            .field("fv_length", &format_args!("{:#x}", self.fv_length))
            .field("block_map", &self.block_map)
            .field("file_store", &self.file_store.is_some())
            .finish()
    }
}

/// The set of flash regions known to the update driver.
#[derive(Default)]
pub struct FlashRegistry<'a> {
    regions: Vec<FlashRegion<'a>>,
}

impl<'a> FlashRegistry<'a> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Registers a block device by reading the firmware volume header it holds.
    ///
    /// Errors
    /// - [`EfiError::VolumeCorrupted`]: the device does not hold a valid firmware volume header.
    /// - Any error from the device.
    pub fn register(
        &mut self,
        handle: FvbHandle,
        device: &'a dyn FirmwareVolumeBlock,
        file_store: Option<&'a dyn FirmwareVolume>,
    ) -> Result<()> {
        let base_address = device.get_physical_address()?;

        let mut fixed = [0u8; fv::HEADER_SIZE];
        read_exact(device, &mut fixed)?;
        let header_length = u16::from_le_bytes([fixed[0x30], fixed[0x31]]) as usize;
        if header_length < fv::HEADER_SIZE + fv::BLOCK_MAP_ENTRY_SIZE {
            log::error!(target: "fw_update", "{:?} at {:#x}: header length {:#x} too small", handle, base_address, header_length);
            Err(EfiError::VolumeCorrupted)?;
        }

        let mut raw_header = Vec::new();
        raw_header.try_reserve_exact(header_length).map_err(|_| EfiError::OutOfResources)?;
        raw_header.resize(header_length, 0u8);
        read_exact(device, &mut raw_header)?;

        let header = VolumeHeader::parse(&raw_header).inspect_err(|err| {
            log::error!(target: "fw_update", "{:?} at {:#x}: invalid volume header: {:?}", handle, base_address, err);
        })?;

        let region = FlashRegion {
            handle,
            base_address,
            fv_length: header.fv_length(),
            block_map: header.block_map().to_vec(),
            device,
            file_store,
        };
        log::info!(
            target: "fw_update",
            "Registered {:?} at {:#x}, {:#x} bytes, file store {}",
            handle,
            base_address,
            region.fv_length,
            region.file_store.is_some()
        );

        self.regions.try_reserve(1).map_err(|_| EfiError::OutOfResources)?;
        self.regions.push(region);
        Ok(())
    }

    /// All registered regions, in registration order.
    pub fn regions(&self) -> &[FlashRegion<'a>] {
        &self.regions
    }

    /// Finds the write capable region whose volume starts at `base_address`.
    pub fn find_by_base(&self, base_address: u64) -> Result<&FlashRegion<'a>> {
        self.find(|region| region.base_address == base_address).inspect_err(|_| {
            log::error!(target: "fw_update", "No writable volume at {:#x}", base_address);
        })
    }

    /// Finds the write capable region containing `address`.
    pub fn find_containing(&self, address: u64) -> Result<&FlashRegion<'a>> {
        self.find(|region| region.contains(address)).inspect_err(|_| {
            log::error!(target: "fw_update", "No writable volume contains {:#x}", address);
        })
    }

    fn find(&self, predicate: impl Fn(&FlashRegion<'a>) -> bool) -> Result<&FlashRegion<'a>> {
        self.regions
            .iter()
            .filter(|region| predicate(region))
            .find(|region| {
                let writable = region.is_write_capable();
                if !writable {
                    log::debug!(target: "fw_update", "{:?} at {:#x} is not write capable", region.handle, region.base_address);
                }
                writable
            })
            .ok_or(EfiError::NotFound)
    }
}

fn read_exact(device: &dyn FirmwareVolumeBlock, buffer: &mut [u8]) -> Result<()> {
    let mut done = 0;
    let mut lba = 0;
    // A header longer than the first block continues in the following blocks.
    while done < buffer.len() {
        let read = device.read(lba, 0, &mut buffer[done..])?;
        if read == 0 {
            Err(EfiError::VolumeCorrupted)?;
        }
        done += read;
        lba += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwup_ffs::volume::Volume;
    use fwup_sdk::protocols::firmware_volume_block::MockFirmwareVolumeBlock;

    const BASE: u64 = 0xFF00_0000;

    fn volume_image() -> Vec<u8> {
        Volume::new(vec![BlockMapEntry::new(4, 0x1000)]).serialize().unwrap()
    }

    fn mock_device(base: u64, attributes: u32) -> MockFirmwareVolumeBlock {
        let image = volume_image();
        let mut device = MockFirmwareVolumeBlock::new();
        device.expect_get_physical_address().returning(move || Ok(base));
        device.expect_get_attributes().returning(move || Ok(attributes));
        device.expect_read().returning(move |lba, offset, buffer| {
            let start = lba as usize * 0x1000 + offset;
            let length = buffer.len().min(0x1000 - offset);
            buffer[..length].copy_from_slice(&image[start..start + length]);
            Ok(length)
        });
        device
    }

    #[test]
    fn test_register_reads_block_map() {
        let device = mock_device(BASE, fvb2::WRITE_STATUS);
        let mut registry = FlashRegistry::new();
        registry.register(FvbHandle(1), &device, None).unwrap();

        let region = &registry.regions()[0];
        assert_eq!(region.base_address, BASE);
        assert_eq!(region.fv_length, 0x4000);
        assert_eq!(region.size(), 0x4000);
        assert_eq!(region.block_map, vec![BlockMapEntry::new(4, 0x1000)]);
    }

    #[test]
    fn test_register_rejects_erased_flash() {
        let mut device = MockFirmwareVolumeBlock::new();
        device.expect_get_physical_address().returning(|| Ok(BASE));
        device.expect_read().returning(|_, _, buffer| {
            buffer.fill(0xFF);
            Ok(buffer.len())
        });

        let mut registry = FlashRegistry::new();
        assert_eq!(registry.register(FvbHandle(1), &device, None), Err(EfiError::VolumeCorrupted));
        assert!(registry.regions().is_empty());
    }

    #[test]
    fn test_find_by_base_requires_exact_match() {
        let device = mock_device(BASE, fvb2::WRITE_STATUS);
        let mut registry = FlashRegistry::new();
        registry.register(FvbHandle(1), &device, None).unwrap();

        assert_eq!(registry.find_by_base(BASE).unwrap().handle, FvbHandle(1));
        assert_eq!(registry.find_by_base(BASE + 0x1000).unwrap_err(), EfiError::NotFound);
        assert_eq!(registry.find_containing(BASE + 0x3FFF).unwrap().handle, FvbHandle(1));
        assert_eq!(registry.find_containing(BASE + 0x4000).unwrap_err(), EfiError::NotFound);
    }

    #[test]
    fn test_read_only_regions_are_skipped() {
        let locked = mock_device(BASE, fvb2::WRITE_ENABLED_CAP | fvb2::LOCK_STATUS);
        let writable = mock_device(BASE, fvb2::WRITE_STATUS);

        let mut registry = FlashRegistry::new();
        registry.register(FvbHandle(1), &locked, None).unwrap();
        assert_eq!(registry.find_by_base(BASE).unwrap_err(), EfiError::NotFound);

        registry.register(FvbHandle(2), &writable, None).unwrap();
        assert_eq!(registry.find_by_base(BASE).unwrap().handle, FvbHandle(2));
    }
}
