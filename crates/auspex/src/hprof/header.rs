use std::io::Read;

use deku::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};
use crate::hprof::reader::HprofRecordReader;
use crate::hprof::tag::RecordTag;

/// Header as laid out on disk: a NUL terminated version string, the identifier
/// width and the dump time in milliseconds since the epoch.
#[derive(Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "big")]
pub struct RawHeader {
    #[deku(until = "|b: &u8| *b == 0")]
    pub version: Vec<u8>,
    pub identifier_size: u32,
    pub timestamp: u64,
}

/// Known format flavours, decided once from the version string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HprofVersion {
    /// `JAVA PROFILE 1.0.1`
    Jdk1_0_1,
    /// `JAVA PROFILE 1.0.2`, segmented heap dumps
    Jdk1_0_2,
    /// `JAVA PROFILE 1.0.3`, Android runtime dumps with extra root kinds
    Android,
}

impl HprofVersion {
    pub fn from_version_string(version: &str) -> Option<Self> {
        match version {
            "JAVA PROFILE 1.0.1" => Some(HprofVersion::Jdk1_0_1),
            "JAVA PROFILE 1.0.2" => Some(HprofVersion::Jdk1_0_2),
            "JAVA PROFILE 1.0.3" => Some(HprofVersion::Android),
            _ => None,
        }
    }

    pub const fn version_string(self) -> &'static str {
        match self {
            HprofVersion::Jdk1_0_1 => "JAVA PROFILE 1.0.1",
            HprofVersion::Jdk1_0_2 => "JAVA PROFILE 1.0.2",
            HprofVersion::Android => "JAVA PROFILE 1.0.3",
        }
    }

    /// Record used to carry heap dump sub-records. Readers accept both.
    pub const fn heap_dump_tag(self) -> RecordTag {
        match self {
            HprofVersion::Jdk1_0_1 => RecordTag::HeapDump,
            HprofVersion::Jdk1_0_2 | HprofVersion::Android => RecordTag::HeapDumpSegment,
        }
    }

    /// Size of the runtime object header carried as fields of `java.lang.Object`
    /// (`shadow$_klass_` and `shadow$_monitor_`), if this flavour carries it.
    pub const fn object_header_field_size(self, identifier_size: usize) -> Option<usize> {
        match self {
            HprofVersion::Android => Some(identifier_size + 4),
            HprofVersion::Jdk1_0_1 | HprofVersion::Jdk1_0_2 => None,
        }
    }
}

/// Decoded and validated header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HprofHeader {
    pub version: HprofVersion,
    pub identifier_size: usize,
    pub timestamp: u64,
    /// Offset of the first record
    pub record_start: u64,
}

impl HprofHeader {
    pub fn new(version: HprofVersion, identifier_size: usize, timestamp: u64) -> Self {
        let record_start = (version.version_string().len() + 1 + 4 + 8) as u64;
        Self { version, identifier_size, timestamp, record_start }
    }

    /// Reads the header from the start of a snapshot, leaving `reader` at the
    /// first record.
    pub fn read<R: Read>(reader: &mut HprofRecordReader<R>) -> Result<Self> {
        let mut bytes = Vec::with_capacity(32);
        loop {
            let b = reader.read_u8()?;
            bytes.push(b);
            if b == 0 {
                break;
            }
            if bytes.len() > 64 {
                return Err(FormatError::Header("version string is not terminated".into()).into());
            }
        }
        let mut tail = [0; 12];
        reader.read_exact(&mut tail)?;
        bytes.extend_from_slice(&tail);

        let (_, raw) = RawHeader::from_bytes((bytes.as_slice(), 0))
            .map_err(|e| FormatError::Header(e.to_string()))?;
        let header = Self::from_raw(&raw)?;
        debug_assert_eq!(header.record_start, reader.bytes_read());
        Ok(header)
    }

    pub fn from_raw(raw: &RawHeader) -> Result<Self> {
        let text = raw.version.strip_suffix(&[0]).unwrap_or(&raw.version);
        let text = String::from_utf8_lossy(text);
        let version = HprofVersion::from_version_string(&text)
            .ok_or_else(|| FormatError::Header(format!("unsupported version `{text}`")))?;
        let identifier_size = match raw.identifier_size {
            1 | 2 | 4 | 8 => raw.identifier_size as usize,
            other => return Err(FormatError::IdentifierSize(other).into()),
        };
        Ok(Self::new(version, identifier_size, raw.timestamp))
    }

    pub fn to_raw(&self) -> RawHeader {
        let mut version = self.version.version_string().as_bytes().to_vec();
        version.push(0);
        let identifier_size = self.identifier_size as u32;
        RawHeader { version, identifier_size, timestamp: self.timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuspexError;
    use rstest::rstest;

    fn header_bytes(version: &str, identifier_size: u32) -> Vec<u8> {
        let mut bytes = version.as_bytes().to_vec();
        bytes.push(0);
        bytes.extend_from_slice(&identifier_size.to_be_bytes());
        bytes.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
        bytes
    }

    #[rstest]
    #[case("JAVA PROFILE 1.0.1", HprofVersion::Jdk1_0_1)]
    #[case("JAVA PROFILE 1.0.2", HprofVersion::Jdk1_0_2)]
    #[case("JAVA PROFILE 1.0.3", HprofVersion::Android)]
    fn test_header_versions(#[case] text: &str, #[case] expected: HprofVersion) {
        let bytes = header_bytes(text, 4);
        let mut reader = HprofRecordReader::new(&bytes[..], 4);
        let header = HprofHeader::read(&mut reader).unwrap();
        assert_eq!(header.version, expected);
        assert_eq!(header.identifier_size, 4);
        assert_eq!(header.timestamp, 1_700_000_000_000);
        assert_eq!(header.record_start, bytes.len() as u64);
    }

    #[rstest]
    #[case(3)]
    #[case(0)]
    #[case(16)]
    fn test_header_rejects_identifier_size(#[case] identifier_size: u32) {
        let bytes = header_bytes("JAVA PROFILE 1.0.2", identifier_size);
        let mut reader = HprofRecordReader::new(&bytes[..], 4);
        let err = HprofHeader::read(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            AuspexError::Format(FormatError::IdentifierSize(s)) if s == identifier_size
        ));
    }

    #[test]
    fn test_header_unknown_version() {
        let bytes = header_bytes("JAVA PROFILE 9", 4);
        let mut reader = HprofRecordReader::new(&bytes[..], 4);
        assert!(matches!(
            HprofHeader::read(&mut reader),
            Err(AuspexError::Format(FormatError::Header(_)))
        ));
    }

    #[test]
    fn test_header_truncated() {
        let bytes = header_bytes("JAVA PROFILE 1.0.2", 8);
        let mut reader = HprofRecordReader::new(&bytes[..bytes.len() - 3], 4);
        assert!(matches!(
            HprofHeader::read(&mut reader),
            Err(AuspexError::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_header_raw_roundtrip() {
        let header = HprofHeader::new(HprofVersion::Android, 2, 42);
        let bytes = header.to_raw().to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, header.record_start);
        let (_, raw) = RawHeader::from_bytes((bytes.as_slice(), 0)).unwrap();
        assert_eq!(HprofHeader::from_raw(&raw).unwrap(), header);
    }
}
