use std::io;

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::macroman;

/// A wire record that reads and writes itself in the protocol's
/// big-endian layout.
pub trait Bytes: Sized {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error>;
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error>;
}

/// Reads bytes up to (and consuming) a NUL terminator. A stream that ends
/// before the terminator yields what was read so far.
pub fn read_cstring(reader: &mut impl ReadBytesExt) -> Result<Vec<u8>, io::Error> {
    let mut out = Vec::new();
    loop {
        match reader.read_u8() {
            Ok(0) => return Ok(out),
            Ok(b) => out.push(b),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !out.is_empty() => {
                return Ok(out)
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn write_cstring(writer: &mut impl WriteBytesExt, bytes: &[u8]) -> Result<(), io::Error> {
    writer.write_all(bytes)?;
    writer.write_u8(0)
}

pub fn read_macroman(reader: &mut impl ReadBytesExt) -> Result<String, io::Error> {
    Ok(macroman::decode(&read_cstring(reader)?))
}

pub fn write_macroman(writer: &mut impl WriteBytesExt, s: &str) -> Result<(), io::Error> {
    write_cstring(writer, &macroman::encode(s))
}

/// Splits a NUL-terminated field out of a fixed-size buffer.
pub fn fixed_cstring(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cstring_reads_to_terminator() {
        let mut cursor = Cursor::new(&b"Hero\0rest"[..]);
        assert_eq!(read_cstring(&mut cursor).unwrap(), b"Hero");
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn unterminated_cstring_at_eof() {
        let mut cursor = Cursor::new(&b"tail"[..]);
        assert_eq!(read_cstring(&mut cursor).unwrap(), b"tail");
        let mut empty = Cursor::new(&b""[..]);
        assert!(read_cstring(&mut empty).is_err());
    }

    #[test]
    fn fixed_field_stops_at_nul() {
        assert_eq!(fixed_cstring(b"Bob\0\0\0"), b"Bob");
        assert_eq!(fixed_cstring(b"Bobby"), b"Bobby");
    }
}
