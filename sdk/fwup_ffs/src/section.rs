//! Firmware File System (FFS) leaf section parsing and composition.
//!
//! This module provides:
//! - `SectionRef`: a zero-copy view over one serialized section.
//! - `SectionIterator`: walks the 4-byte aligned sections that make up a file's content.
//! - `Section`: an owned leaf section that serializes with the standard or extended header as its size requires.
//!
//! Encapsulation sections (compressed or GUID defined) are reported as opaque sections; their contents are not
//! expanded.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use alloc::vec::Vec;
use core::fmt;

use fwup_sdk::pi::ffs::section_header;
use scroll::Pread;

use crate::{align_up, FirmwareFileSystemError};

#[derive(Debug, Clone, Copy, Pread)]
struct CommonHeader {
    size: [u8; 3],
    section_type: u8,
}

/// Zero-copy view over one section.
#[derive(Clone, Copy)]
pub struct SectionRef<'a> {
    section_type: u8,
    header_size: usize,
    data: &'a [u8],
}

impl<'a> SectionRef<'a> {
    /// Parses the section at the start of `buffer`.
    ///
    /// Errors
    /// - [`FirmwareFileSystemError::InvalidHeader`]: the header is truncated, or the size is smaller than the header
    ///   or larger than `buffer`.
    pub fn new(buffer: &'a [u8]) -> Result<Self, FirmwareFileSystemError> {
        let mut offset = 0;
        let header: CommonHeader = buffer.gread_with(&mut offset, scroll::LE)?;

        let size = u32::from_le_bytes([header.size[0], header.size[1], header.size[2], 0]);
        let (size, header_size) = if size == section_header::EXTENDED_SIZE_MARKER {
            let extended_size: u32 = buffer.gread_with(&mut offset, scroll::LE)?;
            (extended_size as usize, section_header::EXTENDED_SIZE)
        } else {
            (size as usize, section_header::SIZE)
        };

        if size < header_size || size > buffer.len() {
            Err(FirmwareFileSystemError::InvalidHeader)?;
        }

        Ok(Self { section_type: header.section_type, header_size, data: &buffer[..size] })
    }

    /// `EFI_SECTION_*` type of the section.
    pub fn section_type(&self) -> u8 {
        self.section_type
    }

    /// Total size of the section including its header.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Section content following the header.
    pub fn content(&self) -> &'a [u8] {
        &self.data[self.header_size..]
    }
}

impl fmt::Debug for SectionRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionRef")
            .field("section_type", &format_args!("{:#x}", self.section_type))
            .field("size", &format_args!("{:#x}", self.size()))
            .finish()
    }
}

/// Parses a list of serialized sections from a raw byte slice.
///
/// Iteration stops after the first error.
pub struct SectionIterator<'a> {
    data: &'a [u8],
    next_offset: usize,
    error: bool,
}

impl<'a> SectionIterator<'a> {
    /// Create a new iterator over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, next_offset: 0, error: false }
    }
}

impl<'a> Iterator for SectionIterator<'a> {
    type Item = Result<SectionRef<'a>, FirmwareFileSystemError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error || self.next_offset >= self.data.len() {
            return None;
        }

        let result = SectionRef::new(&self.data[self.next_offset..]);
        match result {
            Ok(ref section) => match align_up(self.next_offset + section.size(), 4) {
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

/// Owned leaf section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    section_type: u8,
    data: Vec<u8>,
}

impl Section {
    /// Creates a section of `section_type` holding `data`.
    pub fn new(section_type: u8, data: Vec<u8>) -> Self {
        Self { section_type, data }
    }

    /// `EFI_SECTION_*` type of the section.
    pub fn section_type(&self) -> u8 {
        self.section_type
    }

    /// Serializes the section, choosing the extended header when the size does not fit 24 bits.
    pub fn serialize(&self) -> Result<Vec<u8>, FirmwareFileSystemError> {
        let standard_size = self.data.len() + section_header::SIZE;
        let mut buffer = Vec::new();
        if standard_size < section_header::EXTENDED_SIZE_MARKER as usize {
            buffer.extend_from_slice(&(standard_size as u32).to_le_bytes()[..3]);
            buffer.push(self.section_type);
        } else {
            let extended_size: u32 = (self.data.len() + section_header::EXTENDED_SIZE)
                .try_into()
                .map_err(|_| FirmwareFileSystemError::InvalidParameter)?;
            buffer.extend_from_slice(&section_header::EXTENDED_SIZE_MARKER.to_le_bytes()[..3]);
            buffer.push(self.section_type);
            buffer.extend_from_slice(&extended_size.to_le_bytes());
        }
        buffer.extend_from_slice(&self.data);
        Ok(buffer)
    }
}
