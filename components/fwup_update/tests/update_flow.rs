//! End to end update scenarios over simulated flash, a power-fail journal and a real update image volume.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::cell::{Cell, RefCell};

use fwup_ffs::{file::File, section::Section, store::FfsFileStore, volume::Volume};
use fwup_sdk::{
    error::{EfiError, Result},
    pi::{
        ffs::{file_type, section_type},
        fv::BlockMapEntry,
        fvb::fvb2,
    },
    protocols::{
        fault_tolerant_write::{FaultTolerantWrite, LastWrite},
        firmware_volume_block::{FirmwareVolumeBlock, FvbHandle, Lba},
    },
};
use fwup_update::{
    config::{UpdateDriverConfig, CONFIG_FILE_GUID},
    driver::UpdateDriver,
    flash_update::{private_data, PRIVATE_DATA_SIZE},
    platform::UpdatePlatform,
    registry::FlashRegistry,
};
use r_efi::efi;

const BLOCK: usize = 0x1000;
const BASE: u64 = 0xFF00_0000;
const PAYLOAD: efi::Guid = efi::Guid::from_fields(0x8c8ce578, 0x8a3d, 0x4f1c, 0x99, 0x35, &[0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3]);

struct MemoryFlash {
    base: u64,
    bytes: RefCell<Vec<u8>>,
    erases: Cell<usize>,
}

impl MemoryFlash {
    fn new(base: u64, content: Vec<u8>) -> Self {
        assert_eq!(content.len() % BLOCK, 0);
        Self { base, bytes: RefCell::new(content), erases: Cell::new(0) }
    }

    fn contents(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    fn store(&self, lba: Lba, offset: usize, data: &[u8]) {
        let start = lba as usize * BLOCK + offset;
        self.bytes.borrow_mut()[start..start + data.len()].copy_from_slice(data);
    }
}

impl FirmwareVolumeBlock for MemoryFlash {
    fn get_attributes(&self) -> Result<u32> {
        Ok(fvb2::WRITE_STATUS | fvb2::READ_STATUS | fvb2::ERASE_POLARITY)
    }

    fn set_attributes(&self, _attributes: u32) -> Result<u32> {
        Err(EfiError::Unsupported)
    }

    fn get_physical_address(&self) -> Result<u64> {
        Ok(self.base)
    }

    fn get_block_size(&self, lba: Lba) -> Result<(usize, usize)> {
        let blocks = self.bytes.borrow().len() / BLOCK;
        if lba as usize >= blocks {
            return Err(EfiError::InvalidParameter);
        }
        Ok((BLOCK, blocks - lba as usize))
    }

    fn read(&self, lba: Lba, offset: usize, buffer: &mut [u8]) -> Result<usize> {
        let start = lba as usize * BLOCK + offset;
        let length = buffer.len().min(BLOCK - offset);
        buffer[..length].copy_from_slice(&self.bytes.borrow()[start..start + length]);
        Ok(length)
    }

    fn write(&self, lba: Lba, offset: usize, data: &[u8]) -> Result<usize> {
        let length = data.len().min(BLOCK - offset);
        self.store(lba, offset, &data[..length]);
        Ok(length)
    }

    fn erase_blocks(&self, ranges: &[(Lba, usize)]) -> Result<()> {
        for &(lba, count) in ranges {
            let start = lba as usize * BLOCK;
            self.bytes.borrow_mut()[start..start + count * BLOCK].fill(0xFF);
            self.erases.set(self.erases.get() + count);
        }
        Ok(())
    }
}

/// Journal that survives simulated reboots and can lose power in the middle of a write.
struct PowerFailJournal<'f> {
    devices: Vec<(FvbHandle, &'f MemoryFlash)>,
    owner: RefCell<Option<efi::Guid>>,
    last: RefCell<Option<LastWrite>>,
    pending_data: RefCell<Vec<u8>>,
    fail_at: Cell<Option<usize>>,
    writes_this_boot: RefCell<Vec<Lba>>,
}

impl<'f> PowerFailJournal<'f> {
    fn new(devices: Vec<(FvbHandle, &'f MemoryFlash)>) -> Self {
        Self {
            devices,
            owner: RefCell::new(None),
            last: RefCell::new(None),
            pending_data: RefCell::new(Vec::new()),
            fail_at: Cell::new(None),
            writes_this_boot: RefCell::new(Vec::new()),
        }
    }

    fn device(&self, fvb: FvbHandle) -> Result<&'f MemoryFlash> {
        self.devices.iter().find(|(handle, _)| *handle == fvb).map(|(_, device)| *device).ok_or(EfiError::NotFound)
    }

    fn reboot(&self) {
        self.fail_at.set(None);
        self.writes_this_boot.borrow_mut().clear();
    }
}

impl FaultTolerantWrite for PowerFailJournal<'_> {
    fn get_max_block_size(&self) -> Result<usize> {
        Ok(BLOCK)
    }

    fn allocate(&self, caller_id: &efi::Guid, private_data_size: usize, _number_of_writes: usize) -> Result<()> {
        assert_eq!(private_data_size, PRIVATE_DATA_SIZE);
        if matches!(&*self.last.borrow(), Some(last) if !last.complete) {
            return Err(EfiError::AccessDenied);
        }
        *self.owner.borrow_mut() = Some(*caller_id);
        Ok(())
    }

    fn write(&self, lba: Lba, offset: usize, private_data: &[u8], fvb: FvbHandle, data: &[u8]) -> Result<()> {
        let caller_id = self.owner.borrow().ok_or(EfiError::NotFound)?;
        let device = self.device(fvb)?;
        let record = LastWrite {
            caller_id,
            lba,
            offset,
            length: data.len(),
            private_data: private_data.to_vec(),
            complete: false,
        };

        if self.fail_at.get() == Some(self.writes_this_boot.borrow().len()) {
            *self.pending_data.borrow_mut() = data.to_vec();
            *self.last.borrow_mut() = Some(record);
            return Err(EfiError::DeviceError);
        }

        device.store(lba, offset, data);
        *self.last.borrow_mut() = Some(LastWrite { complete: true, ..record });
        self.writes_this_boot.borrow_mut().push(lba);
        Ok(())
    }

    fn restart(&self, fvb: FvbHandle) -> Result<()> {
        let device = self.device(fvb)?;
        let mut last = self.last.borrow_mut();
        let record = last.as_mut().ok_or(EfiError::NotFound)?;
        if !record.complete {
            device.store(record.lba, record.offset, &self.pending_data.borrow());
            record.complete = true;
        }
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        *self.last.borrow_mut() = None;
        Ok(())
    }

    fn get_last_write(&self) -> Result<LastWrite> {
        self.last.borrow().clone().ok_or(EfiError::NotFound)
    }
}

#[derive(Default)]
struct RecordingPlatform {
    reinstalls: RefCell<Vec<FvbHandle>>,
    resets: Cell<usize>,
}

impl UpdatePlatform for RecordingPlatform {
    fn reinstall_volume_block(&self, handle: FvbHandle) -> Result<()> {
        self.reinstalls.borrow_mut().push(handle);
        Ok(())
    }

    fn reset_cold(&self) {
        self.resets.set(self.resets.get() + 1);
    }
}

fn volume(fill: u8) -> Vec<u8> {
    Volume::new(vec![BlockMapEntry::new(4, BLOCK as u32)])
        .with_file(
            File::new(efi::Guid::from_bytes(&[fill; 16]), file_type::RAW).with_content(vec![fill; 2 * BLOCK]),
        )
        .serialize()
        .unwrap()
}

fn update_image(profile: &str, payload: File) -> FfsFileStore {
    let image = Volume::new(vec![BlockMapEntry::new(16, BLOCK as u32)])
        .with_file(
            File::new(CONFIG_FILE_GUID, file_type::FREEFORM)
                .with_section(Section::new(section_type::RAW, profile.as_bytes().to_vec()))
                .unwrap(),
        )
        .with_file(payload)
        .serialize()
        .unwrap();
    FfsFileStore::new(image).unwrap()
}

fn whole_volume_profile(fault_tolerant: bool) -> String {
    format!(
        "[Head]\r\nNumOfUpdate = 1\r\nUpdate0 = MainFv\r\n\r\n[MainFv]\r\nUpdateType = 0\r\nFvBaseAddress = {BASE:#X}\r\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\r\nFaultTolerant = {}\r\n",
        if fault_tolerant { "TRUE" } else { "FALSE" }
    )
}

fn volume_payload(new_volume: &[u8]) -> File {
    File::new(PAYLOAD, file_type::FIRMWARE_VOLUME_IMAGE)
        .with_section(Section::new(section_type::FIRMWARE_VOLUME_IMAGE, new_volume.to_vec()))
        .unwrap()
}

#[test]
fn test_whole_volume_update_replaces_volume_and_resets() {
    let new_volume = volume(0x5A);
    let flash = MemoryFlash::new(BASE, volume(0x11));
    let image = update_image(&whole_volume_profile(false), volume_payload(&new_volume));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, None, &platform).run().unwrap();

    assert_eq!(flash.contents(), new_volume);
    assert_eq!(flash.erases.get(), 4);
    assert_eq!(*platform.reinstalls.borrow(), vec![FvbHandle(1)]);
    assert_eq!(platform.resets.get(), 1);
}

#[test]
fn test_reset_can_be_disabled() {
    let new_volume = volume(0x5A);
    let flash = MemoryFlash::new(BASE, volume(0x11));
    let image = update_image(&whole_volume_profile(false), volume_payload(&new_volume));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    let config = UpdateDriverConfig { reset_on_success: false, ..Default::default() };
    UpdateDriver::new(config, &image, &registry, None, &platform).run().unwrap();

    assert_eq!(flash.contents(), new_volume);
    assert_eq!(platform.resets.get(), 0);
}

#[test]
fn test_interrupted_fault_tolerant_update_resumes_after_reboot() {
    let new_volume = volume(0x5A);
    let flash = MemoryFlash::new(BASE, volume(0x11));
    let journal = PowerFailJournal::new(vec![(FvbHandle(1), &flash)]);
    let image = update_image(&whole_volume_profile(true), volume_payload(&new_volume));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    // Power is lost while block 2 is being written.
    journal.fail_at.set(Some(2));
    let driver = UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, Some(&journal), &platform);
    assert_eq!(driver.run(), Err(EfiError::DeviceError));
    assert_eq!(*journal.writes_this_boot.borrow(), vec![0, 1]);
    assert_eq!(platform.resets.get(), 0);
    assert!(platform.reinstalls.borrow().is_empty());

    journal.reboot();
    driver.run().unwrap();

    assert!(journal.writes_this_boot.borrow().iter().all(|&lba| lba >= 2));
    assert_eq!(*journal.writes_this_boot.borrow(), vec![2, 3]);
    assert_eq!(flash.contents(), new_volume);
    assert_eq!(flash.erases.get(), 0);
    assert_eq!(platform.resets.get(), 1);
}

#[test]
fn test_foreign_pending_write_blocks_update() {
    let old_volume = volume(0x11);
    let flash = MemoryFlash::new(BASE, old_volume.clone());
    let journal = PowerFailJournal::new(vec![(FvbHandle(1), &flash)]);
    *journal.owner.borrow_mut() = Some(efi::Guid::from_bytes(&[0xEE; 16]));
    *journal.last.borrow_mut() = Some(LastWrite {
        caller_id: efi::Guid::from_bytes(&[0xEE; 16]),
        lba: 0,
        offset: 0,
        length: BLOCK,
        private_data: vec![0; PRIVATE_DATA_SIZE],
        complete: false,
    });

    let image = update_image(&whole_volume_profile(true), volume_payload(&volume(0x5A)));
    let platform = RecordingPlatform::default();
    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    let driver = UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, Some(&journal), &platform);
    assert_eq!(driver.run(), Err(EfiError::Aborted));
    assert_eq!(flash.contents(), old_volume);
    assert!(journal.writes_this_boot.borrow().is_empty());
    assert_eq!(journal.get_last_write().unwrap().caller_id, efi::Guid::from_bytes(&[0xEE; 16]));
}

#[test]
fn test_flash_range_spanning_two_volumes() {
    let first_volume = volume(0x11);
    let second_volume = volume(0x22);
    let first = MemoryFlash::new(BASE, first_volume.clone());
    let second = MemoryFlash::new(BASE + 0x4000, second_volume.clone());

    let start = BASE + 0x3F00;
    let profile = format!(
        "[Head]\nNumOfUpdate = 1\nUpdate0 = Range\n[Range]\nUpdateType = 2\nFvBaseAddress = {start:#x}\nFileGuid = 8c8ce578-8a3d-4f1c-9935-896185c32dd3\nLength = 0x200\n"
    );
    // The payload is longer than Length; only Length bytes are applied.
    let payload = File::new(PAYLOAD, file_type::RAW).with_content(vec![0xC7; 0x300]);
    let image = update_image(&profile, payload);
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &first, None).unwrap();
    registry.register(FvbHandle(2), &second, None).unwrap();

    UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, None, &platform).run().unwrap();

    let first_after = first.contents();
    assert_eq!(first_after[..0x3F00], first_volume[..0x3F00]);
    assert!(first_after[0x3F00..].iter().all(|&b| b == 0xC7));

    let second_after = second.contents();
    assert!(second_after[..0x100].iter().all(|&b| b == 0xC7));
    assert_eq!(second_after[0x100..], second_volume[0x100..]);

    assert_eq!(*platform.reinstalls.borrow(), vec![FvbHandle(1), FvbHandle(2)]);
    assert_eq!(platform.resets.get(), 1);
}

#[test]
fn test_fault_tolerant_range_interrupted_in_second_volume_resumes_there() {
    let first_volume = volume(0x11);
    let second_volume = volume(0x22);
    let first = MemoryFlash::new(BASE, first_volume.clone());
    let second = MemoryFlash::new(BASE + 0x4000, second_volume.clone());
    let journal = PowerFailJournal::new(vec![(FvbHandle(1), &first), (FvbHandle(2), &second)]);

    let profile = format!(
        "[Head]\nNumOfUpdate = 1\nUpdate0 = Range\n[Range]\nUpdateType = 2\nFvBaseAddress = {:#x}\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\nLength = 0x200\nFaultTolerant = TRUE\n",
        BASE + 0x3F00
    );
    let image = update_image(&profile, File::new(PAYLOAD, file_type::RAW).with_content(vec![0xC7; 0x200]));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &first, None).unwrap();
    registry.register(FvbHandle(2), &second, None).unwrap();

    // Power is lost while block 0 of the second volume is being written.
    journal.fail_at.set(Some(1));
    let driver = UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, Some(&journal), &platform);
    assert_eq!(driver.run(), Err(EfiError::DeviceError));
    assert_eq!(*journal.writes_this_boot.borrow(), vec![3]);
    let pending = journal.get_last_write().unwrap();
    assert!(!pending.complete);
    assert_eq!(pending.private_data, private_data(&PAYLOAD, BASE + 0x4000));

    journal.reboot();
    driver.run().unwrap();

    // The first volume was committed before the interruption and is left alone; only the second is replayed.
    assert_eq!(*journal.writes_this_boot.borrow(), vec![0]);
    let first_after = first.contents();
    assert_eq!(first_after[..0x3F00], first_volume[..0x3F00]);
    assert!(first_after[0x3F00..].iter().all(|&b| b == 0xC7));

    let second_after = second.contents();
    assert!(second_after[..0x100].iter().all(|&b| b == 0xC7));
    assert_eq!(second_after[0x100..], second_volume[0x100..]);
    assert!(journal.get_last_write().unwrap().complete);
    assert_eq!(platform.resets.get(), 1);
}

#[test]
fn test_fault_tolerant_flash_range_goes_through_journal() {
    let original = volume(0x11);
    let flash = MemoryFlash::new(BASE, original.clone());
    let journal = PowerFailJournal::new(vec![(FvbHandle(1), &flash)]);

    let profile = format!(
        "[Head]\nNumOfUpdate = 1\nUpdate0 = Range\n[Range]\nUpdateType = 2\nFvBaseAddress = {:#x}\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\nLength = 0x1800\nFaultTolerant = true\n",
        BASE + 0x800
    );
    let image = update_image(&profile, File::new(PAYLOAD, file_type::RAW).with_content(vec![0x3C; 0x1800]));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, Some(&journal), &platform).run().unwrap();

    let after = flash.contents();
    assert_eq!(after[..0x800], original[..0x800]);
    assert!(after[0x800..0x2000].iter().all(|&b| b == 0x3C));
    assert_eq!(after[0x2000..], original[0x2000..]);
    assert_eq!(*journal.writes_this_boot.borrow(), vec![0, 1]);
    assert_eq!(flash.erases.get(), 0);
}

#[test]
fn test_batch_stops_after_failing_update() {
    let first_volume = volume(0x11);
    let flash = MemoryFlash::new(BASE, first_volume.clone());
    let profile = format!(
        "[Head]\nNumOfUpdate = 3\nUpdate0 = Good\nUpdate1 = Bad\nUpdate2 = Never\n\
         [Good]\nUpdateType = 2\nFvBaseAddress = {:#x}\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\nLength = 0x10\n\
         [Bad]\nUpdateType = 2\nFvBaseAddress = 0x1000\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\nLength = 0x10\n\
         [Never]\nUpdateType = 2\nFvBaseAddress = {:#x}\nFileGuid = 8C8CE578-8A3D-4F1C-9935-896185C32DD3\nLength = 0x10\n",
        BASE + 0x2000,
        BASE + 0x3000
    );
    let image = update_image(&profile, File::new(PAYLOAD, file_type::RAW).with_content(vec![0x99; 0x10]));
    let platform = RecordingPlatform::default();

    let mut registry = FlashRegistry::new();
    registry.register(FvbHandle(1), &flash, None).unwrap();

    let result = UpdateDriver::new(UpdateDriverConfig::default(), &image, &registry, None, &platform).run();
    assert_eq!(result, Err(EfiError::NotFound));

    let after = flash.contents();
    assert!(after[0x2000..0x2010].iter().all(|&b| b == 0x99));
    assert_eq!(after[0x3000..0x3010], first_volume[0x3000..0x3010]);
    assert_eq!(*platform.reinstalls.borrow(), vec![FvbHandle(1)]);
    assert_eq!(platform.resets.get(), 0);
}
