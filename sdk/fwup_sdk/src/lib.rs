//! Software Development Kit (SDK) for the firmware update components
//!
//! Shared definitions for the update driver and the flash block services:
//!
//! - [`error`]: the EFI status taxonomy as a Rust error type.
//! - [`guid`]: GUID text parsing and display helpers.
//! - [`pi`]: the subset of Platform Initialization (PI) definitions needed to describe firmware volumes.
//! - [`block_map`]: translation between volume byte offsets and logical block addresses.
//! - [`protocols`]: the services consumed from the platform (block devices, file stores, fault tolerant writes).
//!
//! ## Features
//!
//! - `mockall`: Exposes `Mock*` implementations of every service trait for use in dependent crates' tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
#![cfg_attr(all(not(feature = "std"), not(test), not(feature = "mockall")), no_std)]

extern crate alloc;

pub mod block_map;
pub mod error;
pub mod guid;
pub mod pi;
pub mod protocols;

pub use error::{EfiError, Result};
