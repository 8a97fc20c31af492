//! Collaborator services
//!
//! The firmware runtime publishes these interfaces as protocol function tables. The update components consume them
//! as traits so a platform binding, an in-memory simulation, or a mock can stand behind each one.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

pub mod fault_tolerant_write;
pub mod firmware_volume;
pub mod firmware_volume_block;

pub use fault_tolerant_write::{FaultTolerantWrite, LastWrite};
pub use firmware_volume::{FileInfo, FirmwareVolume};
pub use firmware_volume_block::{FirmwareVolumeBlock, FvbHandle, Lba};
