//! Platform services the update driver depends on.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use fwup_sdk::{error::Result, protocols::firmware_volume_block::FvbHandle};

/// Host callbacks invoked around flash updates.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait UpdatePlatform {
    /// Re-publishes the block interface of a mutated volume so its consumers parse the new content.
    fn reinstall_volume_block(&self, handle: FvbHandle) -> Result<()>;

    /// Requests a cold reset. Updates take effect on the next boot.
    fn reset_cold(&self);
}
