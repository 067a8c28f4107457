use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub const FORMAT_MAJOR: u8 = 2;
pub const FORMAT_MINOR: u8 = 1;

/// Two-byte container prefix.  Unknown majors are rejected; a newer minor
/// only adds optional data and is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const CURRENT: Version = Version { major: FORMAT_MAJOR, minor: FORMAT_MINOR };

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.major)?;
        writer.write_u8(self.minor)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let major = reader.read_u8()?;
        let minor = reader.read_u8()?;
        if major != FORMAT_MAJOR {
            return Err(Error::UnsupportedVersion { major, minor });
        }
        Ok(Self { major, minor })
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn newer_minor_is_accepted() {
        let v = Version::read(&[FORMAT_MAJOR, FORMAT_MINOR + 3][..]).unwrap();
        assert_eq!(v.minor, FORMAT_MINOR + 3);
    }

    #[test]
    fn unknown_major_is_rejected() {
        let err = Version::read(&[FORMAT_MAJOR + 1, 0][..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn empty_input_is_truncation() {
        let err = Version::read(&b""[..]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }
}
