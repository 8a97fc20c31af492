//! Firmware Volume (FV) parsing, inspection, and composition.
//!
//! This module provides:
//! - `VolumeHeader`: a validated copy of an FV header and its block map. Only the header bytes are required, which
//!   is what a block service reads from flash at initialization.
//! - `VolumeRef`: a zero-copy, read-only view over a complete serialized FV backed by a byte slice.
//! - `Volume`: an owned builder for assembling FVs from a block map and FFS files and serializing.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use alloc::vec::Vec;
use core::{fmt, iter};

use fwup_sdk::{
    block_map,
    guid::FmtGuid,
    pi::{
        ffs::{self, file_type, header},
        fv::{self, BlockMapEntry},
        fvb::{fvb2, EfiFvbAttributes2},
    },
};
use r_efi::efi;
use scroll::Pread;

use crate::{
    align_up,
    file::{File, FileRef},
    FirmwareFileSystemError,
};

#[derive(Debug, Clone, Copy, Pread)]
struct RawHeader {
    _zero_vector: [u8; 16],
    file_system_guid: [u8; 16],
    fv_length: u64,
    signature: u32,
    attributes: u32,
    header_length: u16,
    _checksum: u16,
    _ext_header_offset: u16,
    _reserved: u8,
    revision: u8,
}

/// Validated firmware volume header.
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    file_system_guid: efi::Guid,
    fv_length: u64,
    attributes: EfiFvbAttributes2,
    header_length: usize,
    revision: u8,
    block_map: Vec<BlockMapEntry>,
}

impl VolumeHeader {
    /// Parses and validates the FV header at the start of `buffer`.
    ///
    /// `buffer` needs to hold the header and block map only.
    ///
    /// Errors
    /// - [`FirmwareFileSystemError::InvalidHeader`]: bad signature, length or checksum.
    /// - [`FirmwareFileSystemError::Unsupported`]: revision below 2 or a file system other than FFS2/FFS3.
    /// - [`FirmwareFileSystemError::InvalidBlockMap`]: empty map, missing `(0,0)` terminator, a half-zero entry, or a
    ///   map that does not add up to the volume length.
    pub fn parse(buffer: &[u8]) -> Result<Self, FirmwareFileSystemError> {
        let raw: RawHeader = buffer.pread_with(0, scroll::LE)?;

        if raw.signature != fv::SIGNATURE {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let header_length = raw.header_length as usize;
        if header_length < fv::HEADER_SIZE || header_length > buffer.len() || header_length & 0x01 != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let sum = buffer[..header_length]
            .chunks_exact(2)
            .fold(0u16, |sum, word| sum.wrapping_add(u16::from_le_bytes([word[0], word[1]])));
        if sum != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        if raw.revision < fv::FFS_REVISION {
            Err(FirmwareFileSystemError::Unsupported)?;
        }

        let file_system_guid = efi::Guid::from_bytes(&raw.file_system_guid);
        if file_system_guid != ffs::FFS2_GUID && file_system_guid != ffs::FFS3_GUID {
            Err(FirmwareFileSystemError::Unsupported)?;
        }

        if raw.fv_length < header_length as u64 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        let block_map = Self::parse_block_map(&buffer[..header_length])?;
        if block_map::volume_size(&block_map) != raw.fv_length {
            Err(FirmwareFileSystemError::InvalidBlockMap)?;
        }

        Ok(Self {
            file_system_guid,
            fv_length: raw.fv_length,
            attributes: raw.attributes,
            header_length,
            revision: raw.revision,
            block_map,
        })
    }

    fn parse_block_map(header: &[u8]) -> Result<Vec<BlockMapEntry>, FirmwareFileSystemError> {
        let mut block_map = Vec::new();
        let mut offset = fv::HEADER_SIZE;
        while offset + fv::BLOCK_MAP_ENTRY_SIZE <= header.len() {
            let num_blocks: u32 = header.gread_with(&mut offset, scroll::LE)?;
            let length: u32 = header.gread_with(&mut offset, scroll::LE)?;
            let entry = BlockMapEntry::new(num_blocks, length);
            if entry.is_terminator() {
                if block_map.is_empty() {
                    Err(FirmwareFileSystemError::InvalidBlockMap)?;
                }
                return Ok(block_map);
            }
            if num_blocks == 0 || length == 0 {
                Err(FirmwareFileSystemError::InvalidBlockMap)?;
            }
            block_map.try_reserve(1).map_err(|_| FirmwareFileSystemError::InvalidBlockMap)?;
            block_map.push(entry);
        }
        Err(FirmwareFileSystemError::InvalidBlockMap)
    }

    /// File system GUID (FFS2 or FFS3).
    pub fn file_system_guid(&self) -> efi::Guid {
        self.file_system_guid
    }

    /// Volume length in bytes, equal to the size mapped by the block map.
    pub fn fv_length(&self) -> u64 {
        self.fv_length
    }

    /// `EFI_FVB_ATTRIBUTES_2` recorded in the header.
    pub fn attributes(&self) -> EfiFvbAttributes2 {
        self.attributes
    }

    /// Header length, including the block map.
    pub fn header_length(&self) -> usize {
        self.header_length
    }

    /// Header revision.
    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// Block map runs, without the terminator.
    pub fn block_map(&self) -> &[BlockMapEntry] {
        &self.block_map
    }

    /// Value of an erased byte on this volume.
    pub fn erase_byte(&self) -> u8 {
        erase_byte(self.attributes)
    }
}

impl fmt::Debug for VolumeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeHeader")
            .field("file_system_guid", &FmtGuid(&self.file_system_guid))
            .field("fv_length", &format_args!("{:#x}", self.fv_length))
            .field("attributes", &format_args!("{:#x}", self.attributes))
            .field("header_length", &self.header_length)
            .field("block_map", &self.block_map)
            .finish()
    }
}

fn erase_byte(attributes: EfiFvbAttributes2) -> u8 {
    if attributes & fvb2::ERASE_POLARITY != 0 {
        0xFF
    } else {
        0x00
    }
}

/// Zero-copy view over a Firmware Volume (FV) backed by a byte slice.
pub struct VolumeRef<'a> {
    data: &'a [u8],
    header: VolumeHeader,
}

impl<'a> VolumeRef<'a> {
    /// Parse a byte slice as a Firmware Volume and validate its metadata.
    ///
    /// In addition to the header checks of [`VolumeHeader::parse`], the whole volume must fit in `buffer`.
    pub fn new(buffer: &'a [u8]) -> Result<Self, FirmwareFileSystemError> {
        let header = VolumeHeader::parse(buffer)?;
        let fv_length = usize::try_from(header.fv_length()).map_err(|_| FirmwareFileSystemError::InvalidHeader)?;
        if fv_length > buffer.len() {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }
        Ok(Self { data: &buffer[..fv_length], header })
    }

    /// The validated header.
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    /// Iterates every file in the volume, pad files included.
    pub fn all_files(&self) -> FileRefIter<'a> {
        FileRefIter::new(self.data, self.header.header_length(), self.header.erase_byte())
    }

    /// Iterates the files in the volume, skipping pad files.
    pub fn files(&self) -> impl Iterator<Item = Result<FileRef<'a>, FirmwareFileSystemError>> {
        self.all_files()
            .filter(|result| !matches!(result, Ok(file) if file.file_type_raw() == file_type::FFS_PAD))
    }

    /// Finds the file named `name`.
    pub fn find_file(&self, name: &efi::Guid) -> Result<FileRef<'a>, FirmwareFileSystemError> {
        for file in self.files() {
            let file = file?;
            if file.name() == *name {
                return Ok(file);
            }
        }
        Err(FirmwareFileSystemError::NotFound)
    }
}

impl fmt::Debug for VolumeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeRef").field("header", &self.header).finish()
    }
}

/// Iterator over the files of a volume. Iteration stops after the first error.
pub struct FileRefIter<'a> {
    data: &'a [u8],
    next_offset: usize,
    erase_byte: u8,
    error: bool,
}

impl<'a> FileRefIter<'a> {
    fn new(data: &'a [u8], header_length: usize, erase_byte: u8) -> Self {
        match align_up(header_length, 8) {
            Ok(next_offset) => Self { data, next_offset, erase_byte, error: false },
            Err(_) => Self { data, next_offset: 0, erase_byte, error: true },
        }
    }
}

impl<'a> Iterator for FileRefIter<'a> {
    type Item = Result<FileRef<'a>, FirmwareFileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error || self.next_offset > self.data.len() {
            return None;
        }
        let remaining = &self.data[self.next_offset..];
        if remaining.len() < header::SIZE {
            return None;
        }
        // Free space starts where an erased header is found.
        if remaining[..header::SIZE].iter().all(|&x| x == self.erase_byte) {
            return None;
        }

        let result = FileRef::new(remaining);
        match result {
            Ok(ref file) => match align_up(self.next_offset + file.size(), 8) {
                Ok(next_offset) => self.next_offset = next_offset,
                Err(err) => {
                    self.error = true;
                    return Some(Err(err));
                }
            },
            Err(_) => self.error = true,
        }
        Some(result)
    }
}

/// Owned, mutable representation of a Firmware Volume for composition and serialization.
pub struct Volume {
    file_system_guid: efi::Guid,
    attributes: EfiFvbAttributes2,
    block_map: Vec<BlockMapEntry>,
    files: Vec<File>,
}

impl Volume {
    /// Create a new empty Firmware Volume builder with the given block map.
    ///
    /// Defaults to the FFSv2 filesystem GUID with erase polarity set.
    pub fn new(block_map: Vec<BlockMapEntry>) -> Self {
        Self { file_system_guid: ffs::FFS2_GUID, attributes: fvb2::ERASE_POLARITY, block_map, files: Vec::new() }
    }

    /// Sets `EFI_FVB_ATTRIBUTES_2` of the volume.
    pub fn with_attributes(mut self, attributes: EfiFvbAttributes2) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the file system GUID of the volume.
    pub fn with_file_system_guid(mut self, file_system_guid: efi::Guid) -> Self {
        self.file_system_guid = file_system_guid;
        self
    }

    /// Appends a file.
    pub fn with_file(mut self, file: File) -> Self {
        self.files.push(file);
        self
    }

    /// Serialize the Firmware Volume into a valid FV byte stream.
    ///
    /// Files are placed at 8-byte aligned offsets in order, and the volume is filled up to the size mapped by the
    /// block map with erased bytes. Fails with `InvalidParameter` if the files do not fit.
    pub fn serialize(&self) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let erase_byte = erase_byte(self.attributes);
        let fv_length = block_map::volume_size(&self.block_map);
        let fv_length_usize = usize::try_from(fv_length).map_err(|_| FirmwareFileSystemError::InvalidParameter)?;
        let header_length = fv::HEADER_SIZE + fv::BLOCK_MAP_ENTRY_SIZE * (self.block_map.len() + 1);
        let header_length_u16 = u16::try_from(header_length).map_err(|_| FirmwareFileSystemError::InvalidParameter)?;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&[0u8; 16]);
        buffer.extend_from_slice(self.file_system_guid.as_bytes());
        buffer.extend_from_slice(&fv_length.to_le_bytes());
        buffer.extend_from_slice(&fv::SIGNATURE.to_le_bytes());
        buffer.extend_from_slice(&self.attributes.to_le_bytes());
        buffer.extend_from_slice(&header_length_u16.to_le_bytes());
        buffer.extend_from_slice(&0u16.to_le_bytes()); // checksum
        buffer.extend_from_slice(&0u16.to_le_bytes()); // ext_header_offset
        buffer.push(0); // reserved
        buffer.push(fv::FFS_REVISION);
        for entry in self.block_map.iter().chain(iter::once(&BlockMapEntry::new(0, 0))) {
            buffer.extend_from_slice(&entry.num_blocks.to_le_bytes());
            buffer.extend_from_slice(&entry.length.to_le_bytes());
        }

        let sum = buffer
            .chunks_exact(2)
            .fold(0u16, |sum, word| sum.wrapping_add(u16::from_le_bytes([word[0], word[1]])));
        let checksum = 0u16.wrapping_sub(sum).to_le_bytes();
        buffer[fv::CHECKSUM_OFFSET..fv::CHECKSUM_OFFSET + 2].copy_from_slice(&checksum);

        for file in &self.files {
            buffer.resize(align_up(buffer.len(), 8)?, erase_byte);
            let mut file = file.clone();
            file.set_erase_polarity(erase_byte == 0xFF);
            buffer.extend(file.serialize()?);
        }

        if buffer.len() > fv_length_usize {
            log::error!(target: "ffs", "Volume content {:#x} exceeds the mapped size {:#x}", buffer.len(), fv_length);
            Err(FirmwareFileSystemError::InvalidParameter)?;
        }
        buffer.resize(fv_length_usize, erase_byte);
        Ok(buffer)
    }
}
