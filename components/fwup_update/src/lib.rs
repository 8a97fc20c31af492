//! Firmware Volume Update Driver
//!
//! Applies firmware updates described by an update profile carried in an update image volume. Each update targets a
//! firmware volume by base address and takes one of three shapes:
//!
//! - **Whole volume**: the target volume is replaced by a firmware volume image section of the payload file.
//! - **Volume file**: the payload file is written into the target volume's file system.
//! - **Flash range**: the raw payload is written over a byte range, which may span several volumes and need not be
//!   block aligned.
//!
//! Block level writes go through the fault tolerant write (FTW) journal when the update asks for it, so an update
//! interrupted by reset or power loss resumes on the next boot from the last journaled block.
//!
//! ## Flow
//!
//! 1. [`driver::UpdateDriver::run`] reads the update profile from the update image.
//! 2. [`profile::parse_update_profile`] turns it into an ordered list of [`profile::UpdateDescriptor`]s.
//! 3. [`dispatcher::UpdateDispatcher`] resolves each target in the [`registry::FlashRegistry`] and drives the
//!    [`flash_update::FlashUpdater`]. The first failure aborts the batch.
//! 4. On success the platform performs a cold reset; updates take effect on the next boot.
//!
//! ## Profile Format
//!
//! ```text
//! [Head]
//! NumOfUpdate = 1
//! Update0 = MainFv
//!
//! [MainFv]
//! UpdateType = 0            # 0=WholeVolume, 1=VolumeFile, 2=FlashRange
//! FvBaseAddress = 0xFF000000
//! FileGuid = 12345678-9ABC-DEF0-1234-56789ABCDEF0
//! FaultTolerant = TRUE
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test), not(feature = "mockall")), no_std)]

extern crate alloc;

pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod flash_update;
pub mod platform;
pub mod profile;
pub mod registry;
