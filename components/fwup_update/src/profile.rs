//! Update Profile Parser
//!
//! The update profile is a line oriented INI-like text file:
//!
//! - `# text` lines are comments.
//! - `[Name]` opens section `Name`. The name runs to the last `]` on the line and is trimmed.
//! - `Key = Value # comment` adds an entry to the current section. The line is split at the first `=` and the value
//!   ends at the first `#`.
//!
//! Every token is trimmed of spaces, tabs, CR and LF. Lines that fit none of the forms, entries without a section,
//! and sections with an empty name are skipped with a warning.
//!
//! When a key is repeated within a section, the last occurrence in the file wins.
//!
//! The `[Head]` section lists the updates:
//!
//! ```text
//! [Head]
//! NumOfUpdate = 2
//! Update0 = FirstUpdate
//! Update1 = SecondUpdate
//! ```
//!
//! and each named section describes one [`UpdateDescriptor`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{format, string::String, vec::Vec};
use core::fmt;

use fwup_sdk::{
    error::EfiError,
    guid::{parse_registry_format, FmtGuid, GuidError},
};
use r_efi::efi;

/// Section listing the updates.
pub const HEAD_SECTION: &str = "Head";
/// Number of updates, in [`HEAD_SECTION`].
pub const NUM_OF_UPDATE_KEY: &str = "NumOfUpdate";
/// Prefix of the `UpdateN` keys in [`HEAD_SECTION`] naming each update's section.
pub const UPDATE_KEY_PREFIX: &str = "Update";
/// [`UpdateType`] as an integer.
pub const UPDATE_TYPE_KEY: &str = "UpdateType";
/// Base address of the target volume.
pub const FV_BASE_ADDRESS_KEY: &str = "FvBaseAddress";
/// Payload file name in the update image.
pub const FILE_GUID_KEY: &str = "FileGuid";
/// `TRUE` or `FALSE`.
pub const FAULT_TOLERANT_KEY: &str = "FaultTolerant";
/// Byte length of a flash range update.
pub const LENGTH_KEY: &str = "Length";

/// Shape of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// Replace a whole firmware volume.
    WholeVolume = 0,
    /// Write one file into a firmware volume.
    VolumeFile = 1,
    /// Write raw bytes over a flash range.
    FlashRange = 2,
}

impl TryFrom<u64> for UpdateType {
    type Error = ProfileError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UpdateType::WholeVolume),
            1 => Ok(UpdateType::VolumeFile),
            2 => Ok(UpdateType::FlashRange),
            other => Err(ProfileError::InvalidUpdateType(other)),
        }
    }
}

/// One requested update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    /// Position in the batch.
    pub index: usize,
    /// Shape of the update.
    pub update_type: UpdateType,
    /// Base address of the target volume, or start address of a flash range.
    pub base_address: u64,
    /// Payload file in the update image.
    pub file_guid: efi::Guid,
    /// Byte length of a flash range update; zero otherwise.
    pub length: u64,
    /// Apply the update through the fault tolerant write journal.
    pub fault_tolerant: bool,
}

impl fmt::Display for UpdateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Update{} {:?} at {:#x} file {} length {:#x} fault tolerant {}",
            self.index,
            self.update_type,
            self.base_address,
            FmtGuid(&self.file_guid),
            self.length,
            self.fault_tolerant
        )
    }
}

/// Update profile errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// The line does not fit the line buffer. Retry with a buffer of `required` bytes.
    BufferTooSmall {
        /// Length of the pending line.
        required: usize,
    },
    /// An allocation failed.
    OutOfResources,
    /// `NumOfUpdate` is zero or not a number.
    NoUpdates,
    /// A required key is absent.
    MissingKey {
        /// Section searched.
        section: String,
        /// Key searched.
        key: String,
    },
    /// A number does not fit 64 bits.
    InvalidInteger {
        /// Section of the value.
        section: String,
        /// Key of the value.
        key: String,
    },
    /// `UpdateType` is not a known [`UpdateType`].
    InvalidUpdateType(u64),
    /// `FileGuid` is not in registry format.
    InvalidGuid(GuidError),
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::BufferTooSmall { required } => write!(f, "Line buffer too small, {required} bytes required"),
            ProfileError::OutOfResources => write!(f, "Out of resources"),
            ProfileError::NoUpdates => write!(f, "{NUM_OF_UPDATE_KEY} must be greater than zero"),
            ProfileError::MissingKey { section, key } => write!(f, "[{section}] {key} not found"),
            ProfileError::InvalidInteger { section, key } => write!(f, "[{section}] {key} is out of range"),
            ProfileError::InvalidUpdateType(value) => write!(f, "Unknown {UPDATE_TYPE_KEY} {value}"),
            ProfileError::InvalidGuid(err) => write!(f, "Invalid {FILE_GUID_KEY}: {err}"),
        }
    }
}

impl From<GuidError> for ProfileError {
    fn from(err: GuidError) -> Self {
        ProfileError::InvalidGuid(err)
    }
}

impl From<ProfileError> for EfiError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::BufferTooSmall { .. } => EfiError::BufferTooSmall,
            ProfileError::OutOfResources => EfiError::OutOfResources,
            ProfileError::NoUpdates | ProfileError::MissingKey { .. } => EfiError::NotFound,
            ProfileError::InvalidInteger { .. } | ProfileError::InvalidUpdateType(_) | ProfileError::InvalidGuid(_) => {
                EfiError::InvalidParameter
            }
        }
    }
}

/// Splits a buffer into lines.
///
/// A line ends at CR, LF, CRLF or the end of the buffer. Reading is two-phase: the caller supplies the line buffer,
/// and a line that does not fit is reported with its length instead of being truncated.
pub struct LineReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> LineReader<'a> {
    /// Creates a reader at the start of `buffer`.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Copies the next line, without its terminator, to the start of `line` and returns its length.
    ///
    /// Returns `Ok(None)` once the buffer is exhausted. Fails with [`ProfileError::BufferTooSmall`] without advancing
    /// when the line is longer than `line`.
    pub fn read_line(&mut self, line: &mut [u8]) -> Result<Option<usize>, ProfileError> {
        if self.position >= self.buffer.len() {
            return Ok(None);
        }

        let rest = &self.buffer[self.position..];
        let end = rest.iter().position(|&c| c == b'\r' || c == b'\n').unwrap_or(rest.len());
        let terminator = match (rest.get(end), rest.get(end + 1)) {
            (Some(b'\r'), Some(b'\n')) => 2,
            (Some(_), _) => 1,
            (None, _) => 0,
        };

        if end > line.len() {
            return Err(ProfileError::BufferTooSmall { required: end });
        }

        line[..end].copy_from_slice(&rest[..end]);
        self.position += end + terminator;
        Ok(Some(end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Comment(String),
    Entry { section: String, key: String, value: String },
}

/// Parsed records of an update profile, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    records: Vec<Record>,
}

fn trim(text: &str) -> &str {
    text.trim_matches(|c| matches!(c, '\r' | '\n' | '\t' | ' '))
}

fn try_to_owned(text: &str) -> Result<String, ProfileError> {
    let mut owned = String::new();
    owned.try_reserve_exact(text.len()).map_err(|_| ProfileError::OutOfResources)?;
    owned.push_str(text);
    Ok(owned)
}

/// Parses a `0x`/`0X` prefixed hexadecimal or a decimal number.
///
/// Leading spaces are skipped and parsing stops at the first character that is not a digit, so text without digits
/// reads as zero. Returns `None` on overflow.
pub fn parse_integer(text: &str) -> Option<u64> {
    let text = text.trim_start_matches(' ');
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };

    let mut value: u64 = 0;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        value = value.checked_mul(radix as u64)?.checked_add(digit as u64)?;
    }
    Some(value)
}

impl Profile {
    /// Parses `buffer`, starting with a line buffer of `initial_line_length` bytes.
    pub fn parse(buffer: &[u8], initial_line_length: usize) -> Result<Self, ProfileError> {
        let mut line = Vec::new();
        line.try_reserve_exact(initial_line_length).map_err(|_| ProfileError::OutOfResources)?;
        line.resize(initial_line_length, 0u8);

        let mut reader = LineReader::new(buffer);
        let mut section: Option<String> = None;
        let mut records = Vec::new();
        let mut line_number = 0usize;

        loop {
            let length = match reader.read_line(&mut line) {
                Ok(Some(length)) => length,
                Ok(None) => break,
                Err(ProfileError::BufferTooSmall { required }) => {
                    log::trace!(target: "fw_update", "Growing profile line buffer from {} to {} bytes", line.len(), required);
                    line.try_reserve_exact(required - line.len()).map_err(|_| ProfileError::OutOfResources)?;
                    line.resize(required, 0u8);
                    continue;
                }
                Err(err) => return Err(err),
            };
            line_number += 1;
            Self::parse_line(&line[..length], line_number, &mut section, &mut records)?;
        }

        log::debug!(target: "fw_update", "Parsed {} profile lines into {} records", line_number, records.len());
        Ok(Self { records })
    }

    fn parse_line(
        raw: &[u8],
        line_number: usize,
        section: &mut Option<String>,
        records: &mut Vec<Record>,
    ) -> Result<(), ProfileError> {
        let Ok(text) = core::str::from_utf8(raw) else {
            log::warn!(target: "fw_update", "Profile line {}: not valid UTF-8, skipped", line_number);
            return Ok(());
        };

        let text = trim(text);
        if text.is_empty() {
            return Ok(());
        }

        let record = if let Some(comment) = text.strip_prefix('#') {
            Record::Comment(try_to_owned(comment)?)
        } else if text.starts_with('[') {
            match text.rfind(']') {
                Some(end) if !trim(&text[1..end]).is_empty() => {
                    let name = trim(&text[1..end]);
                    log::trace!(target: "fw_update", "Profile line {}: section [{}]", line_number, name);
                    *section = Some(try_to_owned(name)?);
                }
                _ => log::warn!(target: "fw_update", "Profile line {}: malformed section header, skipped", line_number),
            }
            return Ok(());
        } else {
            let Some((key, value)) = text.split_once('=') else {
                log::warn!(target: "fw_update", "Profile line {}: no '=' in entry, skipped", line_number);
                return Ok(());
            };
            let key = trim(key);
            let value = trim(value.split_once('#').map_or(value, |(value, _)| value));
            if key.is_empty() {
                log::warn!(target: "fw_update", "Profile line {}: empty key, skipped", line_number);
                return Ok(());
            }
            let Some(section) = section.as_deref() else {
                log::warn!(target: "fw_update", "Profile line {}: entry '{}' outside of any section, skipped", line_number, key);
                return Ok(());
            };
            log::trace!(target: "fw_update", "Profile line {}: [{}] {} = {}", line_number, section, key, value);
            Record::Entry { section: try_to_owned(section)?, key: try_to_owned(key)?, value: try_to_owned(value)? }
        };

        records.try_reserve(1).map_err(|_| ProfileError::OutOfResources)?;
        records.push(record);
        Ok(())
    }

    /// Returns the value of `key` in `section`. Names are case sensitive.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.records.iter().rev().find_map(|record| match record {
            Record::Entry { section: s, key: k, value } if s == section && k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Comment lines, without the leading `#`, in file order.
    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.records.iter().filter_map(|record| match record {
            Record::Comment(comment) => Some(comment.as_str()),
            Record::Entry { .. } => None,
        })
    }

    fn required(&self, section: &str, key: &str) -> Result<&str, ProfileError> {
        self.get(section, key).ok_or_else(|| {
            log::error!(target: "fw_update", "Update profile: [{}] {} not found", section, key);
            ProfileError::MissingKey { section: section.into(), key: key.into() }
        })
    }

    fn required_integer(&self, section: &str, key: &str) -> Result<u64, ProfileError> {
        parse_integer(self.required(section, key)?).ok_or_else(|| {
            log::error!(target: "fw_update", "Update profile: [{}] {} is out of range", section, key);
            ProfileError::InvalidInteger { section: section.into(), key: key.into() }
        })
    }

    /// Extracts the ordered update descriptors.
    pub fn update_descriptors(&self) -> Result<Vec<UpdateDescriptor>, ProfileError> {
        let count = self.required_integer(HEAD_SECTION, NUM_OF_UPDATE_KEY)?;
        if count == 0 {
            log::error!(target: "fw_update", "Update profile: no updates requested");
            return Err(ProfileError::NoUpdates);
        }

        let count = usize::try_from(count).map_err(|_| ProfileError::OutOfResources)?;
        let mut descriptors = Vec::new();

        for index in 0..count {
            let descriptor = self.descriptor(index)?;
            log::debug!(target: "fw_update", "{}", descriptor);
            descriptors.try_reserve(1).map_err(|_| ProfileError::OutOfResources)?;
            descriptors.push(descriptor);
        }

        log::info!(target: "fw_update", "Update profile requests {} updates", descriptors.len());
        Ok(descriptors)
    }

    fn descriptor(&self, index: usize) -> Result<UpdateDescriptor, ProfileError> {
        let section = self.required(HEAD_SECTION, &format!("{UPDATE_KEY_PREFIX}{index}"))?;

        let update_type = UpdateType::try_from(self.required_integer(section, UPDATE_TYPE_KEY)?).inspect_err(|err| {
            log::error!(target: "fw_update", "Update profile: [{}] {}", section, err);
        })?;
        let base_address = self.required_integer(section, FV_BASE_ADDRESS_KEY)?;
        let file_guid = parse_registry_format(self.required(section, FILE_GUID_KEY)?).inspect_err(|err| {
            log::error!(target: "fw_update", "Update profile: [{}] {}: {}", section, FILE_GUID_KEY, err);
        })?;

        let mut fault_tolerant = false;
        if let Some(value) = self.get(section, FAULT_TOLERANT_KEY) {
            if value.eq_ignore_ascii_case("TRUE") {
                fault_tolerant = true;
            } else if value.eq_ignore_ascii_case("FALSE") {
                fault_tolerant = false;
            } else {
                log::warn!(target: "fw_update", "Update profile: [{}] {} = {} ignored", section, FAULT_TOLERANT_KEY, value);
            }
        }

        let length = match update_type {
            UpdateType::FlashRange => self.required_integer(section, LENGTH_KEY)?,
            UpdateType::WholeVolume | UpdateType::VolumeFile => 0,
        };

        Ok(UpdateDescriptor { index, update_type, base_address, file_guid, length, fault_tolerant })
    }
}

/// Parses an update profile into its ordered update descriptors.
pub fn parse_update_profile(buffer: &[u8], initial_line_length: usize) -> Result<Vec<UpdateDescriptor>, ProfileError> {
    Profile::parse(buffer, initial_line_length)?.update_descriptors()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASH_RANGE_PROFILE: &str = "[Head]\r\nNumOfUpdate = 1\r\nUpdate0 = U0\r\n\r\n[U0]\r\nUpdateType = 2\r\nFvBaseAddress = 0x1000\r\nFileGuid = 00000000-0000-0000-0000-000000000000\r\nLength = 0x100\r\n";

    const TWO_UPDATE_PROFILE: &str = "\
# Platform update
[Head]
NumOfUpdate = 2
Update0 = FirstUpdate
Update1 = SecondUpdate

[FirstUpdate]
UpdateType = 0          # WholeVolume
FvBaseAddress = 0xFF000000
FileGuid = 12345678-9ABC-DEF0-1234-56789ABCDEF0
FaultTolerant = TRUE

[SecondUpdate]
UpdateType = 1
FvBaseAddress = 4278255616
FileGuid = 0b2d7a11-9e64-4c1f-a357-102f66d4901b
FaultTolerant = false
";

    fn parse(text: &str) -> Result<Vec<UpdateDescriptor>, ProfileError> {
        parse_update_profile(text.as_bytes(), 512)
    }

    #[test]
    fn test_flash_range_scenario() {
        let descriptors = parse(FLASH_RANGE_PROFILE).unwrap();
        assert_eq!(
            descriptors,
            vec![UpdateDescriptor {
                index: 0,
                update_type: UpdateType::FlashRange,
                base_address: 0x1000,
                file_guid: efi::Guid::from_bytes(&[0u8; 16]),
                length: 0x100,
                fault_tolerant: false,
            }]
        );
    }

    #[test]
    fn test_two_updates_in_order() {
        let descriptors = parse(TWO_UPDATE_PROFILE).unwrap();
        assert_eq!(descriptors.len(), 2);

        assert_eq!(descriptors[0].index, 0);
        assert_eq!(descriptors[0].update_type, UpdateType::WholeVolume);
        assert_eq!(descriptors[0].base_address, 0xFF00_0000);
        assert_eq!(descriptors[0].file_guid, parse_registry_format("12345678-9ABC-DEF0-1234-56789ABCDEF0").unwrap());
        assert!(descriptors[0].fault_tolerant);
        assert_eq!(descriptors[0].length, 0);

        assert_eq!(descriptors[1].index, 1);
        assert_eq!(descriptors[1].update_type, UpdateType::VolumeFile);
        assert_eq!(descriptors[1].base_address, 0xFF01_0000);
        assert!(!descriptors[1].fault_tolerant);
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(parse(TWO_UPDATE_PROFILE).unwrap(), parse(TWO_UPDATE_PROFILE).unwrap());
    }

    #[test]
    fn test_zero_or_missing_update_count_is_not_found() {
        let zero = FLASH_RANGE_PROFILE.replace("NumOfUpdate = 1", "NumOfUpdate = 0");
        assert_eq!(parse(&zero), Err(ProfileError::NoUpdates));
        assert_eq!(EfiError::from(ProfileError::NoUpdates), EfiError::NotFound);

        let missing = FLASH_RANGE_PROFILE.replace("NumOfUpdate = 1\r\n", "");
        let err = parse(&missing).unwrap_err();
        assert_eq!(err, ProfileError::MissingKey { section: "Head".into(), key: "NumOfUpdate".into() });
        assert_eq!(EfiError::from(err), EfiError::NotFound);

        let negative = FLASH_RANGE_PROFILE.replace("NumOfUpdate = 1", "NumOfUpdate = -1");
        assert_eq!(parse(&negative), Err(ProfileError::NoUpdates));
    }

    #[test]
    fn test_flash_range_without_length_is_not_found() {
        let text = FLASH_RANGE_PROFILE.replace("Length = 0x100\r\n", "");
        let err = parse(&text).unwrap_err();
        assert_eq!(err, ProfileError::MissingKey { section: "U0".into(), key: "Length".into() });
        assert_eq!(EfiError::from(err), EfiError::NotFound);
    }

    #[test]
    fn test_missing_required_keys_are_not_found() {
        for key in ["UpdateType = 2\r\n", "FvBaseAddress = 0x1000\r\n", "FileGuid = 00000000-0000-0000-0000-000000000000\r\n"] {
            let text = FLASH_RANGE_PROFILE.replace(key, "");
            assert!(matches!(parse(&text), Err(ProfileError::MissingKey { .. })), "removing {key:?}");
        }

        let text = FLASH_RANGE_PROFILE.replace("Update0 = U0", "Update1 = U0");
        assert_eq!(parse(&text), Err(ProfileError::MissingKey { section: "Head".into(), key: "Update0".into() }));
    }

    #[test]
    fn test_unknown_update_type_is_invalid() {
        let text = FLASH_RANGE_PROFILE.replace("UpdateType = 2", "UpdateType = 3");
        let err = parse(&text).unwrap_err();
        assert_eq!(err, ProfileError::InvalidUpdateType(3));
        assert_eq!(EfiError::from(err), EfiError::InvalidParameter);
    }

    #[test]
    fn test_malformed_guid_is_invalid() {
        let text = FLASH_RANGE_PROFILE.replace("00000000-0000-0000-0000-000000000000", "00000000-0000-0000-0000000000000000");
        let err = parse(&text).unwrap_err();
        assert_eq!(err, ProfileError::InvalidGuid(GuidError::MissingSeparator { position: 23 }));
        assert_eq!(EfiError::from(err), EfiError::InvalidParameter);

        let text = FLASH_RANGE_PROFILE.replace("00000000-0000-0000-0000-000000000000", "00000000-0000-0000-0000-00000000000Z");
        assert!(matches!(parse(&text), Err(ProfileError::InvalidGuid(GuidError::InvalidHexCharacter { .. }))));
    }

    #[test]
    fn test_last_duplicate_key_wins() {
        let text = FLASH_RANGE_PROFILE.replace("Length = 0x100\r\n", "Length = 0x100\r\nLength = 0x200\r\n");
        assert_eq!(parse(&text).unwrap()[0].length, 0x200);

        let profile = Profile::parse(b"[A]\nKey = 1\n[B]\nKey = 2\n[A]\nKey = 3\n", 16).unwrap();
        assert_eq!(profile.get("A", "Key"), Some("3"));
        assert_eq!(profile.get("B", "Key"), Some("2"));
        assert_eq!(profile.get("a", "Key"), None);
    }

    #[test]
    fn test_fault_tolerant_values() {
        for (value, expected) in [("TRUE", true), ("true", true), ("TrUe", true), ("FALSE", false), ("yes", false)] {
            let text = FLASH_RANGE_PROFILE.replace("Length = 0x100", &format!("Length = 0x100\r\nFaultTolerant = {value}"));
            assert_eq!(parse(&text).unwrap()[0].fault_tolerant, expected, "FaultTolerant = {value}");
        }
    }

    #[test]
    fn test_unrecognized_fault_tolerant_keeps_earlier_value() {
        let text = FLASH_RANGE_PROFILE.replace("Length = 0x100", "Length = 0x100\r\nFaultTolerant = TRUE\r\nFaultTolerant = maybe");
        // The last entry wins the lookup, and an unrecognized value leaves the default in place.
        assert!(!parse(&text).unwrap()[0].fault_tolerant);
    }

    #[test]
    fn test_line_classification() {
        let text = "\
Orphan = 1
   # indented comment
[ Spaced Name ]
Key=Value#trailing
NoEquals
 = empty key
Tabbed\t=\t two words \t
[]
[Unclosed
Url = a=b
";
        let profile = Profile::parse(text.as_bytes(), 512).unwrap();
        assert_eq!(profile.get("Spaced Name", "Key"), Some("Value"));
        assert_eq!(profile.get("Spaced Name", "Tabbed"), Some("two words"));
        assert_eq!(profile.get("Spaced Name", "Url"), Some("a=b"));
        assert_eq!(profile.get("Spaced Name", "Orphan"), None);
        assert_eq!(profile.get("Spaced Name", ""), None);
        assert_eq!(profile.comments().collect::<Vec<_>>(), vec![" indented comment"]);
    }

    #[test]
    fn test_section_name_ends_at_last_bracket() {
        let profile = Profile::parse(b"[Outer]Inner]\nKey = 1\n", 512).unwrap();
        assert_eq!(profile.get("Outer]Inner", "Key"), Some("1"));
    }

    #[test]
    fn test_line_endings() {
        let lf = FLASH_RANGE_PROFILE.replace("\r\n", "\n");
        let cr = FLASH_RANGE_PROFILE.replace("\r\n", "\r");
        let expected = parse(FLASH_RANGE_PROFILE).unwrap();
        assert_eq!(parse(&lf).unwrap(), expected);
        assert_eq!(parse(&cr).unwrap(), expected);

        let unterminated = FLASH_RANGE_PROFILE.trim_end();
        assert_eq!(parse(unterminated).unwrap(), expected);
    }

    #[test]
    fn test_line_buffer_grows_for_long_lines() {
        let descriptors = parse_update_profile(FLASH_RANGE_PROFILE.as_bytes(), 4).unwrap();
        assert_eq!(descriptors, parse(FLASH_RANGE_PROFILE).unwrap());

        let descriptors = parse_update_profile(FLASH_RANGE_PROFILE.as_bytes(), 0).unwrap();
        assert_eq!(descriptors.len(), 1);
    }

    #[test]
    fn test_read_line_reports_required_size_without_advancing() {
        let mut reader = LineReader::new(b"short\r\na much longer line\nend");
        let mut small = [0u8; 8];

        assert_eq!(reader.read_line(&mut small), Ok(Some(5)));
        assert_eq!(&small[..5], b"short");

        assert_eq!(reader.read_line(&mut small), Err(ProfileError::BufferTooSmall { required: 18 }));
        let mut large = [0u8; 18];
        assert_eq!(reader.read_line(&mut large), Ok(Some(18)));
        assert_eq!(&large, b"a much longer line");

        assert_eq!(reader.read_line(&mut small), Ok(Some(3)));
        assert_eq!(reader.read_line(&mut small), Ok(None));
    }

    #[test]
    fn test_read_line_empty_lines() {
        let mut reader = LineReader::new(b"\r\n\n\rx");
        let mut line = [0u8; 4];
        assert_eq!(reader.read_line(&mut line), Ok(Some(0)));
        assert_eq!(reader.read_line(&mut line), Ok(Some(0)));
        assert_eq!(reader.read_line(&mut line), Ok(Some(0)));
        assert_eq!(reader.read_line(&mut line), Ok(Some(1)));
        assert_eq!(reader.read_line(&mut line), Ok(None));
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("0x1F"), Some(0x1F));
        assert_eq!(parse_integer("0XfF"), Some(0xFF));
        assert_eq!(parse_integer("  42"), Some(42));
        assert_eq!(parse_integer("12ab"), Some(12));
        assert_eq!(parse_integer("0x"), Some(0));
        assert_eq!(parse_integer("abc"), Some(0));
        assert_eq!(parse_integer("0xFFFFFFFFFFFFFFFF"), Some(u64::MAX));
        assert_eq!(parse_integer("0x10000000000000000"), None);
        assert_eq!(parse_integer("18446744073709551616"), None);
    }

    #[test]
    fn test_oversized_integer_is_invalid() {
        let text = FLASH_RANGE_PROFILE.replace("0x1000\r\n", "0x10000000000000000\r\n");
        let err = parse(&text).unwrap_err();
        assert_eq!(err, ProfileError::InvalidInteger { section: "U0".into(), key: "FvBaseAddress".into() });
        assert_eq!(EfiError::from(err), EfiError::InvalidParameter);
    }

    #[test]
    fn test_huge_update_count_reports_first_missing_update() {
        let text = FLASH_RANGE_PROFILE.replace("NumOfUpdate = 1", "NumOfUpdate = 0xFFFFFFFFFFFFFFFF");
        let err = parse(&text).unwrap_err();
        assert_eq!(err, ProfileError::MissingKey { section: "Head".into(), key: "Update1".into() });
        assert_eq!(EfiError::from(err), EfiError::NotFound);
    }
}
