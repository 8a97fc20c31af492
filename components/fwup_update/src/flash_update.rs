//! Block Level Flash Updates
//!
//! [`FlashUpdater`] applies an update to one [`FlashRegion`], either by replacing the whole volume or by writing a
//! byte range that need not be block aligned.
//!
//! Without fault tolerance, each touched block is erased and rewritten in place. A block only partly covered by the
//! update is read first and the new bytes are merged into the copy, since erase is block granular.
//!
//! With fault tolerance, every block goes through the [`FaultTolerantWrite`] journal, tagged with the payload file
//! name and the base address of the target volume as private data. Before anything is written the journal is queried
//! for an interrupted transaction:
//!
//! - no record, or a completed one: a new transaction is allocated for all blocks.
//! - an incomplete record of another owner or another payload: the update fails with [`EfiError::Aborted`].
//! - an incomplete record of this byte range update that targets a later volume: this volume was committed before the
//!   interruption, so nothing is written here and the journal is left for the volume that owns the record.
//! - an incomplete record of this update and this volume: the journal is restarted and blocks below the interrupted
//!   one are skipped. The interrupted block must match the block computed now or the update fails with
//!   [`EfiError::Aborted`]. When the restart itself fails the record is aborted and the update starts over.
//!
//! Any other incomplete record fails the update with [`EfiError::Aborted`].
//!
//! Blocks are always processed in ascending LBA order and the first failure stops the update.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;

use fwup_sdk::{
    block_map,
    error::{EfiError, Result},
    guid::FmtGuid,
    protocols::{
        fault_tolerant_write::FaultTolerantWrite,
        firmware_volume_block::{FirmwareVolumeBlock, Lba},
    },
};
use r_efi::efi;

use crate::registry::FlashRegion;

const GUID_SIZE: usize = core::mem::size_of::<efi::Guid>();

/// Size of the private data recorded with each journaled block: the payload file name followed by the little endian
/// base address of the target volume.
pub const PRIVATE_DATA_SIZE: usize = GUID_SIZE + core::mem::size_of::<u64>();

/// Builds the private data tagging a journaled block of `file_guid` written to the volume at `base_address`.
pub fn private_data(file_guid: &efi::Guid, base_address: u64) -> [u8; PRIVATE_DATA_SIZE] {
    let mut data = [0u8; PRIVATE_DATA_SIZE];
    data[..GUID_SIZE].copy_from_slice(file_guid.as_bytes());
    data[GUID_SIZE..].copy_from_slice(&base_address.to_le_bytes());
    data
}

/// One block touched by a byte range update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    lba: Lba,
    offset: usize,
    length: usize,
    block_length: usize,
    data_offset: usize,
}

impl Chunk {
    fn is_whole_block(&self) -> bool {
        self.offset == 0 && self.length == self.block_length
    }
}

/// Where a fault tolerant update starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Fresh,
    Pending { lba: Lba, offset: usize, length: usize },
    /// The interrupted write belongs to a later volume of the same range.
    Committed,
}

impl Resume {
    /// Decides whether the block at `lba` still needs a journaled write.
    fn should_write(&self, lba: Lba, offset: usize, length: usize) -> Result<bool> {
        match *self {
            Resume::Fresh => Ok(true),
            Resume::Committed => Ok(false),
            Resume::Pending { lba: pending_lba, .. } if lba < pending_lba => {
                log::debug!(target: "ftw_update", "LBA {:#x} committed before the interruption, skipped", lba);
                Ok(false)
            }
            Resume::Pending { lba: pending_lba, offset: pending_offset, length: pending_length } if lba == pending_lba => {
                if pending_offset != offset || pending_length != length {
                    log::error!(
                        target: "ftw_update",
                        "Interrupted write at LBA {:#x} was offset {:#x} length {:#x}, expected offset {:#x} length {:#x}",
                        lba,
                        pending_offset,
                        pending_length,
                        offset,
                        length
                    );
                    Err(EfiError::Aborted)?;
                }
                Ok(true)
            }
            Resume::Pending { .. } => Ok(true),
        }
    }

    /// Warns when a resumed update ended without meeting the interrupted block.
    fn check_reached(&self, last_lba: Option<Lba>) {
        if let Resume::Pending { lba, .. } = *self {
            if last_lba.map_or(true, |last| last < lba) {
                log::warn!(
                    target: "ftw_update",
                    "Interrupted write at LBA {:#x} lies beyond the last block {:?} of this update and was never replayed",
                    lba,
                    last_lba
                );
            }
        }
    }
}

/// Applies updates to flash regions.
pub struct FlashUpdater<'a> {
    ftw: Option<&'a dyn FaultTolerantWrite>,
    caller_id: efi::Guid,
}

impl<'a> FlashUpdater<'a> {
    /// Creates an updater. `caller_id` owns the journal transactions; `ftw` is required for fault tolerant updates
    /// only.
    pub fn new(ftw: Option<&'a dyn FaultTolerantWrite>, caller_id: efi::Guid) -> Self {
        Self { ftw, caller_id }
    }

    /// Replaces the whole volume of `region` with `image`.
    ///
    /// Errors
    /// - [`EfiError::InvalidParameter`]: `image` is not exactly the size mapped by the region's block map.
    /// - [`EfiError::NotFound`]: fault tolerance was requested but no journal is available.
    /// - [`EfiError::OutOfResources`]: a block is larger than the journal supports.
    /// - [`EfiError::Aborted`]: the journal holds an incomplete transaction of another update.
    /// - Any error from the block device or the journal.
    pub fn update_firmware_volume(
        &self,
        region: &FlashRegion<'_>,
        image: &[u8],
        file_guid: &efi::Guid,
        fault_tolerant: bool,
    ) -> Result<()> {
        if image.len() as u64 != region.size() {
            log::error!(
                target: "fw_update",
                "Volume image of {:#x} bytes does not match the {:#x} byte volume at {:#x}",
                image.len(),
                region.size(),
                region.base_address
            );
            Err(EfiError::InvalidParameter)?;
        }

        log::info!(
            target: "fw_update",
            "Updating volume at {:#x} from {} ({:#x} bytes, fault tolerant {})",
            region.base_address,
            FmtGuid(file_guid),
            image.len(),
            fault_tolerant
        );

        if fault_tolerant {
            self.fault_tolerant_update_volume(region, image, file_guid)
        } else {
            Self::update_volume(region, image)
        }
    }

    /// Writes `data` starting at physical `address` inside `region` and returns how many bytes were written.
    ///
    /// The write stops at the end of the region; the caller continues the remainder in the next region.
    ///
    /// Errors
    /// - [`EfiError::InvalidParameter`]: `address` is outside the region.
    /// - Same as [`FlashUpdater::update_firmware_volume`] otherwise.
    pub fn update_flash_area(
        &self,
        region: &FlashRegion<'_>,
        address: u64,
        data: &[u8],
        file_guid: &efi::Guid,
        fault_tolerant: bool,
    ) -> Result<usize> {
        if !region.contains(address) {
            log::error!(
                target: "fw_update",
                "Address {:#x} is outside the volume at {:#x}..{:#x}",
                address,
                region.base_address,
                region.end_address()
            );
            Err(EfiError::InvalidParameter)?;
        }

        let available = region.end_address() - address;
        let length = usize::try_from(available).map_or(data.len(), |available| available.min(data.len()));
        let data = &data[..length];
        let chunks = Self::split_range(region, address, length)?;

        log::info!(
            target: "fw_update",
            "Updating {:#x} bytes at {:#x} over {} blocks (fault tolerant {})",
            length,
            address,
            chunks.len(),
            fault_tolerant
        );

        if fault_tolerant {
            self.fault_tolerant_update_chunks(region, &chunks, data, file_guid)?;
        } else {
            Self::update_chunks(region, &chunks, data)?;
        }
        Ok(length)
    }

    fn split_range(region: &FlashRegion<'_>, address: u64, length: usize) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        let mut volume_offset = address - region.base_address;
        let mut data_offset = 0;

        while data_offset < length {
            let location = block_map::locate(&region.block_map, volume_offset)?;
            let chunk_length = (location.block_length - location.offset).min(length - data_offset);
            chunks.try_reserve(1).map_err(|_| EfiError::OutOfResources)?;
            chunks.push(Chunk {
                lba: location.lba,
                offset: location.offset,
                length: chunk_length,
                block_length: location.block_length,
                data_offset,
            });
            data_offset += chunk_length;
            volume_offset += chunk_length as u64;
        }
        Ok(chunks)
    }

    fn update_volume(region: &FlashRegion<'_>, image: &[u8]) -> Result<()> {
        for (lba, info) in block_map::blocks(&region.block_map) {
            let start = info.offset as usize;
            log::debug!(target: "fw_update", "Rewriting LBA {:#x} ({:#x} bytes)", lba, info.block_length);
            erase_and_write(region.device, lba, &image[start..start + info.block_length])?;
        }
        Ok(())
    }

    fn update_chunks(region: &FlashRegion<'_>, chunks: &[Chunk], data: &[u8]) -> Result<()> {
        let scratch_length =
            chunks.iter().filter(|chunk| !chunk.is_whole_block()).map(|chunk| chunk.block_length).max().unwrap_or(0);
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(scratch_length).map_err(|_| EfiError::OutOfResources)?;
        scratch.resize(scratch_length, 0u8);

        for chunk in chunks {
            let source = &data[chunk.data_offset..chunk.data_offset + chunk.length];
            if chunk.is_whole_block() {
                log::debug!(target: "fw_update", "Rewriting LBA {:#x}", chunk.lba);
                erase_and_write(region.device, chunk.lba, source)?;
                continue;
            }

            log::debug!(
                target: "fw_update",
                "Merging {:#x} bytes at offset {:#x} into LBA {:#x}",
                chunk.length,
                chunk.offset,
                chunk.lba
            );
            let block = &mut scratch[..chunk.block_length];
            let read = region.device.read(chunk.lba, 0, block)?;
            if read != block.len() {
                log::error!(target: "fw_update", "Short read of LBA {:#x}: {:#x} of {:#x} bytes", chunk.lba, read, block.len());
                Err(EfiError::DeviceError)?;
            }
            block[chunk.offset..chunk.offset + chunk.length].copy_from_slice(source);
            erase_and_write(region.device, chunk.lba, block)?;
        }
        Ok(())
    }

    fn fault_tolerant_update_volume(&self, region: &FlashRegion<'_>, image: &[u8], file_guid: &efi::Guid) -> Result<()> {
        let ftw = self.journal()?;
        let number_of_writes = usize::try_from(block_map::total_blocks(&region.block_map))
            .map_err(|_| EfiError::OutOfResources)?;
        let resume = self.begin(
            ftw,
            region,
            block_map::max_block_length(&region.block_map),
            number_of_writes,
            file_guid,
            false,
        )?;
        let private_data = private_data(file_guid, region.base_address);

        for (lba, info) in block_map::blocks(&region.block_map) {
            if !resume.should_write(lba, 0, info.block_length)? {
                continue;
            }
            let start = info.offset as usize;
            log::debug!(target: "ftw_update", "Journaled rewrite of LBA {:#x} ({:#x} bytes)", lba, info.block_length);
            ftw.write(lba, 0, &private_data, region.handle, &image[start..start + info.block_length]).inspect_err(
                |err| {
                    log::error!(target: "ftw_update", "Journaled write of LBA {:#x} failed: {:?}", lba, err);
                },
            )?;
        }
        resume.check_reached(block_map::total_blocks(&region.block_map).checked_sub(1));
        Ok(())
    }

    fn fault_tolerant_update_chunks(
        &self,
        region: &FlashRegion<'_>,
        chunks: &[Chunk],
        data: &[u8],
        file_guid: &efi::Guid,
    ) -> Result<()> {
        let ftw = self.journal()?;
        let max_block_length = chunks.iter().map(|chunk| chunk.block_length).max().unwrap_or(0);
        let resume = self.begin(ftw, region, max_block_length, chunks.len(), file_guid, true)?;
        let private_data = private_data(file_guid, region.base_address);

        for chunk in chunks {
            if !resume.should_write(chunk.lba, chunk.offset, chunk.length)? {
                continue;
            }
            log::debug!(
                target: "ftw_update",
                "Journaled write of {:#x} bytes at offset {:#x} of LBA {:#x}",
                chunk.length,
                chunk.offset,
                chunk.lba
            );
            let source = &data[chunk.data_offset..chunk.data_offset + chunk.length];
            ftw.write(chunk.lba, chunk.offset, &private_data, region.handle, source).inspect_err(|err| {
                log::error!(target: "ftw_update", "Journaled write of LBA {:#x} failed: {:?}", chunk.lba, err);
            })?;
        }
        resume.check_reached(chunks.last().map(|chunk| chunk.lba));
        Ok(())
    }

    fn journal(&self) -> Result<&'a dyn FaultTolerantWrite> {
        self.ftw.ok_or_else(|| {
            log::error!(target: "ftw_update", "Fault tolerant update requested without a fault tolerant write service");
            EfiError::NotFound
        })
    }

    /// Checks journal capacity, recovers an interrupted transaction, and allocates a new one when none is resumed.
    ///
    /// `spans_regions` is set for byte range updates, whose later volumes may own the interrupted write.
    fn begin(
        &self,
        ftw: &dyn FaultTolerantWrite,
        region: &FlashRegion<'_>,
        max_block_length: usize,
        number_of_writes: usize,
        file_guid: &efi::Guid,
        spans_regions: bool,
    ) -> Result<Resume> {
        let journal_block_size = ftw.get_max_block_size()?;
        if journal_block_size < max_block_length {
            log::error!(
                target: "ftw_update",
                "Block of {:#x} bytes exceeds the journal limit of {:#x} bytes",
                max_block_length,
                journal_block_size
            );
            Err(EfiError::OutOfResources)?;
        }

        let resume = self.recover(ftw, region, file_guid, spans_regions)?;
        if resume == Resume::Fresh {
            log::debug!(target: "ftw_update", "Allocating journal for {} writes", number_of_writes);
            ftw.allocate(&self.caller_id, PRIVATE_DATA_SIZE, number_of_writes)?;
        }
        Ok(resume)
    }

    fn recover(
        &self,
        ftw: &dyn FaultTolerantWrite,
        region: &FlashRegion<'_>,
        file_guid: &efi::Guid,
        spans_regions: bool,
    ) -> Result<Resume> {
        let last = match ftw.get_last_write() {
            Ok(last) => last,
            Err(EfiError::NotFound) => return Ok(Resume::Fresh),
            Err(err) => return Err(err),
        };
        if last.complete {
            return Ok(Resume::Fresh);
        }

        if last.caller_id != self.caller_id
            || last.private_data.len() != PRIVATE_DATA_SIZE
            || last.private_data[..GUID_SIZE] != *file_guid.as_bytes()
        {
            log::error!(
                target: "ftw_update",
                "Journal holds an incomplete write of {} at LBA {:#x} that does not belong to this update",
                FmtGuid(&last.caller_id),
                last.lba
            );
            Err(EfiError::Aborted)?;
        }

        let mut base_address = [0u8; 8];
        base_address.copy_from_slice(&last.private_data[GUID_SIZE..]);
        let base_address = u64::from_le_bytes(base_address);
        if base_address != region.base_address {
            if spans_regions && base_address >= region.end_address() {
                log::info!(
                    target: "ftw_update",
                    "Interrupted update of {} belongs to the volume at {:#x}; volume at {:#x} was already committed",
                    FmtGuid(file_guid),
                    base_address,
                    region.base_address
                );
                return Ok(Resume::Committed);
            }
            log::error!(
                target: "ftw_update",
                "Incomplete write of {} targets the volume at {:#x}, not the volume at {:#x}",
                FmtGuid(file_guid),
                base_address,
                region.base_address
            );
            Err(EfiError::Aborted)?;
        }

        match ftw.restart(region.handle) {
            Ok(()) => {
                log::info!(
                    target: "ftw_update",
                    "Resuming interrupted update of {} at LBA {:#x}",
                    FmtGuid(file_guid),
                    last.lba
                );
                Ok(Resume::Pending { lba: last.lba, offset: last.offset, length: last.length })
            }
            Err(err) => {
                log::warn!(
                    target: "ftw_update",
                    "Restart of interrupted update of {} at LBA {:#x} failed ({:?}); aborting it and starting over, earlier progress is discarded",
                    FmtGuid(file_guid),
                    last.lba,
                    err
                );
                ftw.abort()?;
                Ok(Resume::Fresh)
            }
        }
    }
}

fn erase_and_write(device: &dyn FirmwareVolumeBlock, lba: Lba, data: &[u8]) -> Result<()> {
    device.erase_blocks(&[(lba, 1)])?;
    let written = device.write(lba, 0, data)?;
    if written != data.len() {
        log::error!(target: "fw_update", "Short write to LBA {:#x}: {:#x} of {:#x} bytes", lba, written, data.len());
        Err(EfiError::DeviceError)?;
    }
    Ok(())
}
