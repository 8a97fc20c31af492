//! SPI Flash Firmware Volume Block Service
//!
//! Presents the firmware volumes stored in a SPI NOR flash part through the
//! [`FirmwareVolumeBlock`](fwup_sdk::protocols::firmware_volume_block::FirmwareVolumeBlock) interface.
//!
//! All bus traffic goes through [`spi::SpiController::execute`], driven by the opcode table of the flash part
//! identified at initialization. [`flash::SpiFlash`] turns that primitive into read, program and erase of linear
//! flash offsets, and [`fvb::SpiFvbModule`] maps each firmware volume's logical blocks onto it.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = SpiFlashConfig { volumes: vec![0xFF80_0000, 0xFFC0_0000], ..Default::default() };
//! let module = SpiFvbModule::initialize(&controller, &config)?;
//! for instance in module.instances() {
//!     registry.register(instance.handle(), instance, None)?;
//! }
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
pub mod flash;
pub mod fvb;
pub mod spi;
