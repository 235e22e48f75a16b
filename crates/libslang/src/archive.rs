//! Little-endian byte archive used for module files and macro bodies.
//!
//! Integers that can be large but usually are not (counts, table indices,
//! byte ranges) are written as variable-length quantities: base-128 with the
//! continuation bit in the high bit of each byte, least-significant group
//! first. Signed values are zigzag-mapped before encoding so small negative
//! indices (the import-table scheme uses `-1 - index`) stay short. `i32` and
//! `f32` payloads are fixed four-byte little-endian.

use crate::error::CompileError;

/// An in-memory write archive.
#[derive(Debug, Default)]
pub struct WriteArchive {
    buffer: Vec<u8>,
}

impl WriteArchive {
    /// Creates an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position, in bytes.
    pub fn tell(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes the archive and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// The written bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes an unsigned variable-length integer.
    pub fn write_varuint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buffer.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Writes a signed variable-length integer (zigzag).
    pub fn write_varint(&mut self, value: i64) {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_varuint(zigzag);
    }

    /// Writes a fixed four-byte little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a fixed four-byte little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_varuint(value.len() as u64);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Writes a length-prefixed byte buffer.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_varuint(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }
}

/// A read archive over a byte slice.
#[derive(Debug)]
pub struct ReadArchive<'data> {
    data: &'data [u8],
    position: usize,
}

impl<'data> ReadArchive<'data> {
    /// Creates a read archive over the given bytes.
    pub fn new(data: &'data [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position, in bytes.
    pub fn tell(&self) -> usize {
        self.position
    }

    /// Remaining unread byte count.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CompileError> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or_else(|| CompileError::serialization("Unexpected end of archive."))?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'data [u8], CompileError> {
        if self.remaining() < count {
            return Err(CompileError::serialization("Unexpected end of archive."));
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Reads an unsigned variable-length integer.
    pub fn read_varuint(&mut self) -> Result<u64, CompileError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(CompileError::serialization(
                    "Variable-length integer is too long.",
                ));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(value)
    }

    /// Reads a signed variable-length integer (zigzag).
    pub fn read_varint(&mut self) -> Result<i64, CompileError> {
        let zigzag = self.read_varuint()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    /// Reads a fixed four-byte little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, CompileError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a fixed four-byte little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, CompileError> {
        let bytes = self.read_bytes(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, CompileError> {
        let length = self.read_varuint()? as usize;
        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CompileError::serialization("Invalid UTF-8 in archive string."))
    }

    /// Reads a length-prefixed byte buffer.
    pub fn read_blob(&mut self) -> Result<Vec<u8>, CompileError> {
        let length = self.read_varuint()? as usize;
        Ok(self.read_bytes(length)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(127)]
    #[case(128)]
    #[case(300)]
    #[case(u64::MAX)]
    fn varuint_round_trip(#[case] value: u64) {
        let mut writer = WriteArchive::new();
        writer.write_varuint(value);
        let bytes = writer.into_bytes();

        let mut reader = ReadArchive::new(&bytes);
        assert_eq!(reader.read_varuint().unwrap(), value);
        assert_eq!(reader.remaining(), 0);
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    #[case(1)]
    #[case(-64)]
    #[case(64)]
    #[case(i64::MIN)]
    #[case(i64::MAX)]
    fn varint_round_trip(#[case] value: i64) {
        let mut writer = WriteArchive::new();
        writer.write_varint(value);
        let bytes = writer.into_bytes();

        let mut reader = ReadArchive::new(&bytes);
        assert_eq!(reader.read_varint().unwrap(), value);
    }

    #[test]
    fn small_negative_indices_stay_short() {
        // The import table scheme encodes `-1 - index`; those must be one byte.
        let mut writer = WriteArchive::new();
        writer.write_varint(-1);
        assert_eq!(writer.into_bytes().len(), 1);
    }

    #[test]
    fn primitives_are_little_endian() {
        let mut writer = WriteArchive::new();
        writer.write_i32(0x0102_0304);
        writer.write_f32(1.0);
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);

        let mut reader = ReadArchive::new(&bytes);
        assert_eq!(reader.read_i32().unwrap(), 0x0102_0304);
        assert_eq!(reader.read_f32().unwrap(), 1.0);
    }

    #[test]
    fn string_round_trip() {
        let mut writer = WriteArchive::new();
        writer.write_str("hello, slang");
        let bytes = writer.into_bytes();

        let mut reader = ReadArchive::new(&bytes);
        assert_eq!(reader.read_str().unwrap(), "hello, slang");
    }

    #[test]
    fn truncated_archive_is_an_error() {
        let mut writer = WriteArchive::new();
        writer.write_str("hello");
        let mut bytes = writer.into_bytes();
        bytes.truncate(3);

        let mut reader = ReadArchive::new(&bytes);
        assert!(reader.read_str().is_err());
    }
}
