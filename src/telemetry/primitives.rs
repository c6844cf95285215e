//! Primitive types of the metric transport format.
//!
//! All integers and floats are big-endian. Strings are UTF-8 with an
//! explicit `INT32` byte-length prefix, never null-terminated, so that any
//! UTF-8 content round-trips byte-exact. A zero length encodes an empty
//! string and writes no payload bytes.

use std::io::{Read, Write};

use super::traits::{ReadError, ReadType, WriteError, WriteType};

impl<R: Read> ReadType<R> for u8 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl<W: Write> WriteType<W> for u8 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&[*self])?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for i32 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for i32 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_be_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for i64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for i64 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_be_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for f64 {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        Ok(f64::from_be_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for f64 {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let buf = self.to_be_bytes();
        writer.write_all(&buf)?;
        Ok(())
    }
}

// STRING
impl<R: Read> ReadType<R> for String {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = i32::read(reader)?;
        if len < 0 {
            return Err(ReadError::Malformed(
                format!("Invalid negative length for string: {len}").into(),
            ));
        }

        let buf = read_exact_vec(reader, usize::try_from(len)?)?;
        let s = String::from_utf8(buf).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        Ok(s)
    }
}

impl<W: Write> WriteType<W> for String {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = i32::try_from(self.len()).map_err(WriteError::Overflow)?;
        len.write(writer)?;
        if !self.is_empty() {
            writer.write_all(self.as_bytes())?;
        }
        Ok(())
    }
}

/// Reads exactly `len` bytes without trusting `len` for the initial
/// allocation, so a corrupted length prefix cannot blow up memory.
pub(crate) fn read_exact_vec<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, ReadError> {
    let mut buf = Vec::with_capacity(len.min(1024));
    let read = reader.take(len as u64).read_to_end(&mut buf)?;
    if read != len {
        return Err(ReadError::IO(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes but got {read}"),
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;
    use crate::telemetry::test_utils::test_roundtrip;

    test_roundtrip!(u8, test_u8_roundtrip);

    test_roundtrip!(i32, test_i32_roundtrip);

    test_roundtrip!(i64, test_i64_roundtrip);

    test_roundtrip!(String, test_string_roundtrip);

    #[test]
    fn test_f64_roundtrip() {
        for v in [0.0, -0.0, 1.5, -133.7, f64::MIN, f64::MAX, f64::EPSILON] {
            let mut data = vec![];
            v.write(&mut data).unwrap();

            let restored = f64::read(&mut Cursor::new(data)).unwrap();
            assert_eq!(restored, v);
        }
    }

    #[test]
    fn test_empty_string_encodes_length_only() {
        let mut data = vec![];
        String::new().write(&mut data).unwrap();
        assert_eq!(data, vec![0, 0, 0, 0]);

        let restored = String::read(&mut Cursor::new(data)).unwrap();
        assert_eq!(restored, "");
    }

    #[test]
    fn test_string_negative_length() {
        let mut data = vec![];
        (-1i32).write(&mut data).unwrap();

        let err = String::read(&mut Cursor::new(data)).unwrap_err();
        assert_matches!(err, ReadError::Malformed(_));
        assert_eq!(
            err.to_string(),
            "Malformed data: Invalid negative length for string: -1",
        );
    }

    #[test]
    fn test_string_blowup_memory() {
        let mut data = vec![];
        i32::MAX.write(&mut data).unwrap();

        let err = String::read(&mut Cursor::new(data)).unwrap_err();
        assert_matches!(err, ReadError::IO(_));
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut data = vec![];
        2i32.write(&mut data).unwrap();
        data.extend_from_slice(&[0xff, 0xfe]);

        let err = String::read(&mut Cursor::new(data)).unwrap_err();
        assert_matches!(err, ReadError::Malformed(_));
    }
}
