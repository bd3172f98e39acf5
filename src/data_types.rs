//! Data types used in the S98 format.

use core::fmt::Write as _;

use snafu::Snafu;

/// Error parsing a variable-length integer
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Insufficient bytes to parse variable-length integer (byte #{byte})
    InsufficientBytes { byte: u8 },
    /// Variable-length integer does not fit in 32 bits
    Overflow,
}

/// A variable-length unsigned integer as used by the S98 n-sync command.
///
/// In its encoded form,
/// each byte carries 7 bits of payload, least significant group first,
/// and the high bit of each byte indicates whether another byte follows it.
/// A 32-bit value takes at most 5 bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VarInt(u32);

impl VarInt {
    /// The largest number of bytes an encoded value can take
    pub const MAX_LEN: usize = 5;

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }

    /// Parse a variable-length integer from a byte slice,
    /// returning the parsed value and the remaining bytes
    pub fn parse(from: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let mut value: u32 = 0;
        for i in 0..Self::MAX_LEN {
            let byte = from
                .get(i)
                .copied()
                .ok_or(ParseError::InsufficientBytes { byte: i as u8 })?;
            let payload = (byte & 0x7F) as u32;

            // the fifth byte may only contribute the top 4 bits
            if i == Self::MAX_LEN - 1 && (byte & 0x80 != 0 || payload > 0x0F) {
                return Err(ParseError::Overflow);
            }
            value |= payload << (7 * i);

            if byte & 0x80 == 0 {
                return Ok((Self(value), &from[i + 1..]));
            }
        }
        Err(ParseError::Overflow)
    }

    /// Write the integer to a mutable slice,
    /// returning the number of bytes written.
    ///
    /// If the slice is too short to contain the integer,
    /// the result may be trimmed.
    pub fn write_to_slice(self, to: &mut [u8]) -> u8 {
        let mut value = self.0;
        let mut k = 0;
        for byte in to.iter_mut().take(Self::MAX_LEN) {
            *byte = (value & 0x7F) as u8;
            value >>= 7;
            k += 1;
            if value == 0 {
                break;
            }
            *byte |= 0x80;
        }
        k
    }

    pub fn write_to(self, mut to: impl std::io::Write) -> std::io::Result<u8> {
        let mut buf = [0u8; Self::MAX_LEN];
        let k = self.write_to_slice(&mut buf);
        to.write_all(&buf[..k as usize])?;
        Ok(k)
    }
}

/// Display an array of bytes as ASCII text
pub(crate) struct Ascii<T>(pub T);

impl<T> core::fmt::Debug for Ascii<T>
where
    T: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_char('"')?;
        core::fmt::Display::fmt(self, f)?;
        f.write_char('"')?;
        Ok(())
    }
}

impl<T> core::fmt::Display for Ascii<T>
where
    T: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &byte in self.0.as_ref() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02X}", byte)?;
            }
        }
        Ok(())
    }
}
