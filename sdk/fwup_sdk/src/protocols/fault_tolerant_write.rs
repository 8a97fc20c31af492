//! Fault Tolerant Write (FTW) Service
//!
//! A journaled block writer. Before a block is rewritten the journal records the target `(lba, offset, length)` and
//! caller private data, so a write interrupted by reset or power loss can be completed with [`FaultTolerantWrite::restart`]
//! on the next boot.
//!
//! The journal keeps a single pending transaction. [`FaultTolerantWrite::allocate`] opens a transaction of a fixed
//! number of writes for one caller, and each [`FaultTolerantWrite::write`] consumes one record of it.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use alloc::vec::Vec;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use r_efi::efi;

use crate::{
    error::Result,
    protocols::firmware_volume_block::{FvbHandle, Lba},
};

/// The most recent write record of the pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWrite {
    /// Owner of the transaction.
    pub caller_id: efi::Guid,
    /// Target block.
    pub lba: Lba,
    /// Offset within the target block.
    pub offset: usize,
    /// Number of bytes written at `offset`.
    pub length: usize,
    /// Data the owner attached to the record.
    pub private_data: Vec<u8>,
    /// `true` once every write of the transaction has landed.
    pub complete: bool,
}

/// Journaled block writes that survive reset.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait FaultTolerantWrite {
    /// Largest block the journal can protect in a single write.
    fn get_max_block_size(&self) -> Result<usize>;

    /// Opens a transaction of `number_of_writes` writes, each carrying `private_data_size` bytes of private data.
    ///
    /// Fails with `AccessDenied` while an incomplete transaction exists.
    fn allocate(&self, caller_id: &efi::Guid, private_data_size: usize, number_of_writes: usize) -> Result<()>;

    /// Writes `data` to `lba` at `offset` of the device identified by `fvb`, journaling it first.
    fn write(&self, lba: Lba, offset: usize, private_data: &[u8], fvb: FvbHandle, data: &[u8]) -> Result<()>;

    /// Completes the interrupted write of the pending transaction on `fvb`.
    fn restart(&self, fvb: FvbHandle) -> Result<()>;

    /// Discards the pending transaction.
    fn abort(&self) -> Result<()>;

    /// Returns the latest record of the pending transaction.
    ///
    /// Fails with `NotFound` when the journal holds no transaction.
    fn get_last_write(&self) -> Result<LastWrite>;
}
