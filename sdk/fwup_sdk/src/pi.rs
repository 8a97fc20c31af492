//! Platform Initialization (PI) Definitions
//!
//! The subset of the UEFI Platform Initialization Specification V1.8A Volume 3 (Shared Architectural Elements)
//! needed to describe, validate and rewrite firmware volumes.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

pub mod ffs;
pub mod fv;
pub mod fvb;
