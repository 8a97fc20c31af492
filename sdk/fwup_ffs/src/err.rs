//! Error types and conversions for the Firmware File System (FFS) crate.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0

use fwup_sdk::error::EfiError;
use r_efi::efi;

/// Error definitions for Firmware File System
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFileSystemError {
    /// The FFS header is invalid or malformed.
    InvalidHeader,
    /// The block map structure is invalid.
    InvalidBlockMap,
    /// A parameter provided to a function is invalid.
    InvalidParameter,
    /// The requested operation or feature is unsupported.
    Unsupported,
    /// The FFS is in an invalid or unexpected state.
    InvalidState,
    /// Data corruption was detected in the FFS.
    DataCorrupt,
    /// The requested file or section does not exist.
    NotFound,
}

impl From<FirmwareFileSystemError> for EfiError {
    fn from(value: FirmwareFileSystemError) -> Self {
        match value {
            FirmwareFileSystemError::InvalidParameter => EfiError::InvalidParameter,
            FirmwareFileSystemError::Unsupported => EfiError::Unsupported,
            FirmwareFileSystemError::NotFound => EfiError::NotFound,
            FirmwareFileSystemError::InvalidHeader
            | FirmwareFileSystemError::InvalidBlockMap
            | FirmwareFileSystemError::InvalidState
            | FirmwareFileSystemError::DataCorrupt => EfiError::VolumeCorrupted,
        }
    }
}

impl From<FirmwareFileSystemError> for efi::Status {
    fn from(value: FirmwareFileSystemError) -> Self {
        let err: EfiError = value.into();
        err.into()
    }
}

impl From<scroll::Error> for FirmwareFileSystemError {
    fn from(_: scroll::Error) -> Self {
        FirmwareFileSystemError::InvalidHeader
    }
}
