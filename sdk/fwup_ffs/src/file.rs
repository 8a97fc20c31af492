//! Firmware File System (FFS) file parsing and composition.
//!
//! This module provides:
//! - `FileRef`: a zero-copy, read-only view over a serialized FFS file backed by a byte slice.
//! - `File`: an owned builder for creating and serializing FFS files from sections or raw content.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::vec::Vec;
use core::{fmt, iter};

use fwup_sdk::{
    guid::FmtGuid,
    pi::ffs::{attributes, header, state},
};
use r_efi::efi;
use scroll::Pread;

use crate::{
    section::{Section, SectionIterator},
    FirmwareFileSystemError,
};

#[derive(Debug, Clone, Copy, Pread)]
struct Header {
    name: [u8; 16],
    _integrity_check_header: u8,
    integrity_check_file: u8,
    file_type: u8,
    attributes: u8,
    size: [u8; 3],
    state: u8,
}

/// Zero-copy view over a Firmware File System (FFS) file backed by a byte slice.
///
/// Parsing via [`FileRef::new`] validates the header, state, and (optionally) the data checksum.
#[derive(Clone)]
pub struct FileRef<'a> {
    data: &'a [u8],
    header: Header,
    content_offset: usize,
}

impl<'a> FileRef<'a> {
    /// Parse a byte slice as an FFS file and validate header/state/checksums.
    ///
    /// Errors
    /// - [`FirmwareFileSystemError::InvalidHeader`]: malformed header or size.
    /// - [`FirmwareFileSystemError::InvalidState`]: file state not DATA_VALID.
    /// - [`FirmwareFileSystemError::DataCorrupt`]: data checksum mismatch.
    pub fn new(buffer: &'a [u8]) -> Result<Self, FirmwareFileSystemError> {
        let mut offset = 0;
        let header: Header = buffer.gread_with(&mut offset, scroll::LE)?;

        let (size, content_offset) = if header.attributes & attributes::LARGE_FILE == 0 {
            let size = u32::from_le_bytes([header.size[0], header.size[1], header.size[2], 0]);
            (size as usize, header::SIZE)
        } else {
            let extended_size: u64 = buffer.gread_with(&mut offset, scroll::LE)?;
            let extended_size = usize::try_from(extended_size).map_err(|_| FirmwareFileSystemError::InvalidHeader)?;
            (extended_size, header::LARGE_SIZE)
        };

        if size < content_offset || size > buffer.len() {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        // The reserved high bit of the state byte follows the volume erase polarity, so the polarity is inferred
        // from it. Only fully written files (DATA_VALID and nothing later) are accepted.
        let state_bits = if header.state & 0x80 == 0 { header.state } else { !header.state };
        if state_bits & 0xFC != state::DATA_VALID {
            Err(FirmwareFileSystemError::InvalidState)?;
        }

        let sum = buffer[..content_offset].iter().fold(0u8, |sum, val| sum.wrapping_add(*val));
        let sum = sum.wrapping_sub(header.state).wrapping_sub(header.integrity_check_file);
        if sum != 0 {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        if header.attributes & attributes::CHECKSUM == 0 {
            if header.integrity_check_file != header::FILE_CHECKSUM_NOT_COMPUTED {
                Err(FirmwareFileSystemError::InvalidHeader)?;
            }
        } else {
            let sum = buffer[content_offset..size]
                .iter()
                .fold(header.integrity_check_file, |sum, val| sum.wrapping_add(*val));
            if sum != 0 {
                Err(FirmwareFileSystemError::DataCorrupt)?;
            }
        }

        Ok(Self { data: &buffer[..size], header, content_offset })
    }

    /// Total serialized size of the file in bytes (header + content).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The file name GUID from the FFS header.
    pub fn name(&self) -> efi::Guid {
        efi::Guid::from_bytes(&self.header.name)
    }

    /// `EFI_FV_FILETYPE_*` of the file.
    pub fn file_type_raw(&self) -> u8 {
        self.header.file_type
    }

    /// `FFS_ATTRIB_*` of the file.
    pub fn attributes_raw(&self) -> u8 {
        self.header.attributes
    }

    /// File content following the header.
    pub fn content(&self) -> &'a [u8] {
        &self.data[self.content_offset..]
    }

    /// Iterates the sections of a sectioned file.
    pub fn sections(&self) -> SectionIterator<'a> {
        SectionIterator::new(self.content())
    }
}

impl fmt::Debug for FileRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef")
            .field("name", &FmtGuid(&self.name()))
            .field("file_type", &format_args!("{:#x}", self.file_type_raw()))
            .field("attributes", &format_args!("{:#x}", self.attributes_raw()))
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}

/// Owned FFS file for composition and serialization.
#[derive(Debug, Clone)]
pub struct File {
    name: efi::Guid,
    file_type_raw: u8,
    attributes: u8,
    erase_polarity: bool,
    content: Vec<u8>,
}

impl File {
    /// Creates an empty file of the given name and `EFI_FV_FILETYPE_*`.
    pub fn new(name: efi::Guid, file_type_raw: u8) -> Self {
        Self { name, file_type_raw, attributes: attributes::CHECKSUM, erase_polarity: true, content: Vec::new() }
    }

    /// Sets the file content verbatim, for unsectioned file types such as RAW.
    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = content;
        self
    }

    /// Appends a section, aligning it to 4 bytes.
    pub fn with_section(mut self, section: Section) -> Result<Self, FirmwareFileSystemError> {
        if self.content.len() % 4 != 0 {
            // Section pad bytes are always zero.
            let pad_length = 4 - (self.content.len() % 4);
            self.content.extend(iter::repeat(0u8).take(pad_length));
        }
        self.content.extend(section.serialize()?);
        Ok(self)
    }

    /// Replaces the `FFS_ATTRIB_*` byte. `LARGE_FILE` is managed by [`File::serialize`].
    pub fn with_attributes(mut self, attributes: u8) -> Self {
        self.attributes = attributes & !attributes::LARGE_FILE;
        self
    }

    /// Set the erase polarity to encode in the header state bits.
    pub fn set_erase_polarity(&mut self, erase_polarity: bool) {
        self.erase_polarity = erase_polarity;
    }

    /// The file name GUID.
    pub fn name(&self) -> efi::Guid {
        self.name
    }

    /// Serializes the header followed by the content.
    ///
    /// The large header is used when the size does not fit the 24-bit size field.
    pub fn serialize(&self) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let large = self.content.len() + header::SIZE > 0x00FF_FFFF;
        let header_size = if large { header::LARGE_SIZE } else { header::SIZE };
        let total_size = header_size + self.content.len();

        let mut buffer = Vec::with_capacity(total_size);
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0); // integrity_check_header
        buffer.push(0); // integrity_check_file
        buffer.push(self.file_type_raw);
        if large {
            buffer.push(self.attributes | attributes::LARGE_FILE);
            buffer.extend_from_slice(&[0u8; 3]);
            buffer.push(0); // state
            buffer.extend_from_slice(&(total_size as u64).to_le_bytes());
        } else {
            buffer.push(self.attributes);
            buffer.extend_from_slice(&(total_size as u32).to_le_bytes()[..3]);
            buffer.push(0); // state
        }

        let sum = buffer.iter().fold(0u8, |sum, value| sum.wrapping_add(*value));
        buffer[16] = 0u8.wrapping_sub(sum);

        buffer[17] = if self.attributes & attributes::CHECKSUM != 0 {
            0u8.wrapping_sub(self.content.iter().fold(0u8, |sum, value| sum.wrapping_add(*value)))
        } else {
            header::FILE_CHECKSUM_NOT_COMPUTED
        };

        let file_state = state::HEADER_CONSTRUCTION | state::HEADER_VALID | state::DATA_VALID;
        buffer[23] = if self.erase_polarity { !file_state } else { file_state };

        buffer.extend_from_slice(&self.content);
        Ok(buffer)
    }
}
