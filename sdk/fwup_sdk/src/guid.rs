//! GUID helpers
//!
//! - [`FmtGuid`] - Displays an `efi::Guid` in registry format for log messages.
//! - [`parse_registry_format`] - Parses the strict `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` text form used by update
//!   profiles. Unlike lenient parsers that accept any 32 hex digits, every separator must be present at its position.
//!
//! ## Examples
//!
//! ```rust
//! use fwup_sdk::guid::{parse_registry_format, FmtGuid, GuidError};
//!
//! let guid = parse_registry_format("12345678-9ABC-DEF0-1234-56789ABCDEF0")?;
//! assert_eq!(format!("{}", FmtGuid(&guid)), "12345678-9ABC-DEF0-1234-56789ABCDEF0");
//!
//! assert_eq!(
//!     parse_registry_format("123456789ABC-DEF0-1234-56789ABCDEF0"),
//!     Err(GuidError::MissingSeparator { position: 8 })
//! );
//! # Ok::<(), GuidError>(())
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

use crate::error::EfiError;
use r_efi::efi;

/// Length of the registry format text representation.
pub const REGISTRY_FORMAT_LENGTH: usize = 36;

/// Separator positions in the registry format.
const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Error type for GUID parsing operations
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum GuidError {
    /// The text ended before all 32 hex digits and 4 separators were read.
    TooShort {
        /// Number of characters available.
        actual: usize,
    },
    /// A `-` separator was expected at the given position.
    MissingSeparator {
        /// Zero-based character position.
        position: usize,
    },
    /// A hex digit was expected at the given position.
    InvalidHexCharacter {
        /// Zero-based character position.
        position: usize,
        /// The character that was found.
        character: char,
    },
    /// The text passed the positional checks but was still rejected by the UUID parser.
    Invalid,
}

impl core::fmt::Display for GuidError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GuidError::TooShort { actual } => {
                write!(f, "GUID text too short: expected {REGISTRY_FORMAT_LENGTH} characters, found {actual}")
            }
            GuidError::MissingSeparator { position } => write!(f, "Missing '-' separator at position {position}"),
            GuidError::InvalidHexCharacter { position, character } => {
                write!(f, "Invalid hex character '{character}' at position {position}")
            }
            GuidError::Invalid => write!(f, "Invalid GUID text"),
        }
    }
}

impl core::error::Error for GuidError {}

impl From<GuidError> for EfiError {
    fn from(_: GuidError) -> Self {
        EfiError::InvalidParameter
    }
}

/// Parses `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` into an `efi::Guid`.
///
/// Characters after the 36th are ignored.
pub fn parse_registry_format(text: &str) -> Result<efi::Guid, GuidError> {
    let bytes = text.as_bytes();
    if bytes.len() < REGISTRY_FORMAT_LENGTH {
        // Report the first structural problem rather than the length, when there is one.
        check_prefix(bytes)?;
        return Err(GuidError::TooShort { actual: bytes.len() });
    }

    let text = &bytes[..REGISTRY_FORMAT_LENGTH];
    check_prefix(text)?;

    // UUID fields are big endian text; to_bytes_le gives the EFI_GUID memory layout.
    let uuid = uuid::Uuid::try_parse_ascii(text).map_err(|_| GuidError::Invalid)?;
    Ok(efi::Guid::from_bytes(&uuid.to_bytes_le()))
}

fn check_prefix(bytes: &[u8]) -> Result<(), GuidError> {
    for (position, &c) in bytes.iter().enumerate() {
        if DASH_POSITIONS.contains(&position) {
            if c != b'-' {
                return Err(GuidError::MissingSeparator { position });
            }
        } else if !c.is_ascii_hexdigit() {
            return Err(GuidError::InvalidHexCharacter { position, character: c as char });
        }
    }
    Ok(())
}

/// Displays an `efi::Guid` as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
pub struct FmtGuid<'a>(pub &'a efi::Guid);

impl core::fmt::Display for FmtGuid<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (time_low, time_mid, time_hi, clk_hi, clk_low, node) = self.0.as_fields();
        write!(f, "{time_low:08X}-{time_mid:04X}-{time_hi:04X}-{clk_hi:02X}{clk_low:02X}-")?;
        for byte in node {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for FmtGuid<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}
