//! Byte-level building blocks of the binary tree format.
//!
//! # Encodings
//! ```text
//! int      value < 254  → 1 byte
//!          otherwise    → 0xFE, then 4 bytes little-endian (i32)
//! string   int (UTF-16 unit count), then every unit as an int
//! f64/i64  8 bytes little-endian
//! ```
//!
//! # Short integers
//! Topology is a run of child counts, nearly all of them 0, 2 or 3. Those take two
//! bits, 1, 4 and 5 take four, and anything larger escapes to a byte-aligned int.
//! Units are packed from the least significant end of each byte.
//!
//! ```text
//! value   bits (first unit first)
//! 0       00
//! 2       01
//! 3       10
//! 1       11 00
//! 4       11 01
//! 5       11 10
//! ≥ 6     11 11, pad to byte boundary, int
//! ```

use crate::error::BinaryError;
use std::io::{self, Read, Seek, Write};

/// First byte of an int that does not fit in one byte.
const WIDE_INT: u8 = 254;

// ============================================================================
// Plain values
// ============================================================================

pub fn write_int<W: Write>(out: &mut W, value: usize) -> Result<(), BinaryError> {
    if value < WIDE_INT as usize {
        out.write_all(&[value as u8])?;
    } else {
        let wide = i32::try_from(value)
            .map_err(|_| BinaryError::IntegerOverflow { value: value as u64 })?;
        out.write_all(&[WIDE_INT])?;
        out.write_all(&wide.to_le_bytes())?;
    }
    Ok(())
}

pub fn read_int<R: Read + Seek>(input: &mut R) -> Result<usize, BinaryError> {
    let first = read_byte(input)?;
    read_int_after(input, first)
}

/// Finishes an int whose first byte has already been consumed.
pub fn read_int_after<R: Read + Seek>(input: &mut R, first: u8) -> Result<usize, BinaryError> {
    if first < WIDE_INT {
        return Ok(first as usize);
    }
    let mut buf = [0u8; 4];
    read_exact(input, &mut buf)?;
    let value = i32::from_le_bytes(buf);
    usize::try_from(value).map_err(|_| BinaryError::IntegerOverflow { value: value as u64 })
}

pub fn write_string<W: Write>(out: &mut W, value: &str) -> Result<(), BinaryError> {
    let units: Vec<u16> = value.encode_utf16().collect();
    write_int(out, units.len())?;
    for unit in units {
        write_int(out, unit as usize)?;
    }
    Ok(())
}

pub fn read_string<R: Read + Seek>(input: &mut R) -> Result<String, BinaryError> {
    let start = position(input);
    let count = read_int(input)?;
    let mut units = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let unit = read_int(input)?;
        let unit = u16::try_from(unit).map_err(|_| BinaryError::InvalidString { position: start })?;
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| BinaryError::InvalidString { position: start })
}

pub fn write_f64<W: Write>(out: &mut W, value: f64) -> Result<(), BinaryError> {
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_f64<R: Read + Seek>(input: &mut R) -> Result<f64, BinaryError> {
    let mut buf = [0u8; 8];
    read_exact(input, &mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub fn write_i64<W: Write>(out: &mut W, value: u64) -> Result<(), BinaryError> {
    let value = i64::try_from(value).map_err(|_| BinaryError::IntegerOverflow { value })?;
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_i64<R: Read + Seek>(input: &mut R) -> Result<u64, BinaryError> {
    let mut buf = [0u8; 8];
    read_exact(input, &mut buf)?;
    let value = i64::from_le_bytes(buf);
    u64::try_from(value).map_err(|_| BinaryError::IntegerOverflow { value: value as u64 })
}

pub fn read_byte<R: Read + Seek>(input: &mut R) -> Result<u8, BinaryError> {
    let mut buf = [0u8; 1];
    read_exact(input, &mut buf)?;
    Ok(buf[0])
}

/// `read_exact` that reports a short read with the byte offset where it happened.
pub fn read_exact<R: Read + Seek>(input: &mut R, buf: &mut [u8]) -> Result<(), BinaryError> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(BinaryError::UnexpectedEof { position: position(input) })
        }
        Err(e) => Err(e.into()),
    }
}

/// Current offset, for error reports only.
pub fn position<S: Seek>(stream: &mut S) -> u64 {
    stream.stream_position().unwrap_or(0)
}

// ============================================================================
// Short integers
// ============================================================================

/// Packs short integers two bits at a time.
///
/// # Invariants
/// - `bit` is even and always < 8 between calls
/// - bits above `bit` in `current` are zero
#[derive(Debug, Default)]
pub struct ShortIntWriter {
    current: u8,
    bit: u8,
}

impl ShortIntWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<W: Write>(&mut self, out: &mut W, value: usize) -> Result<(), BinaryError> {
        match value {
            0 => self.put(out, 0b00),
            2 => self.put(out, 0b01),
            3 => self.put(out, 0b10),
            1 | 4 | 5 => {
                self.put(out, 0b11)?;
                self.put(out, value.saturating_sub(3) as u8)
            }
            _ => {
                self.put(out, 0b11)?;
                self.put(out, 0b11)?;
                self.finish(out)?;
                write_int(out, value)
            }
        }
    }

    /// Writes the partial byte, if any.
    pub fn finish<W: Write>(&mut self, out: &mut W) -> Result<(), BinaryError> {
        if self.bit != 0 {
            out.write_all(&[self.current])?;
            self.current = 0;
            self.bit = 0;
        }
        Ok(())
    }

    fn put<W: Write>(&mut self, out: &mut W, unit: u8) -> Result<(), BinaryError> {
        self.current |= unit << self.bit;
        self.bit += 2;
        if self.bit == 8 {
            out.write_all(&[self.current])?;
            self.current = 0;
            self.bit = 0;
        }
        Ok(())
    }
}

/// Unpacks short integers written by [`ShortIntWriter`].
///
/// Bytes are fetched only when a unit is needed, so after the last value the
/// stream sits right after the last byte that held any of its bits.
#[derive(Debug)]
pub struct ShortIntReader {
    current: u8,
    /// 8 means the current byte is used up.
    bit: u8,
}

impl Default for ShortIntReader {
    fn default() -> Self {
        ShortIntReader { current: 0, bit: 8 }
    }
}

impl ShortIntReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R: Read + Seek>(&mut self, input: &mut R) -> Result<usize, BinaryError> {
        Ok(match self.take(input)? {
            0b00 => 0,
            0b01 => 2,
            0b10 => 3,
            _ => match self.take(input)? {
                0b00 => 1,
                0b01 => 4,
                0b10 => 5,
                _ => {
                    // the rest of the current byte is padding
                    self.bit = 8;
                    read_int(input)?
                }
            },
        })
    }

    fn take<R: Read + Seek>(&mut self, input: &mut R) -> Result<u8, BinaryError> {
        if self.bit == 8 {
            self.current = read_byte(input)?;
            self.bit = 0;
        }
        let unit = (self.current >> self.bit) & 0b11;
        self.bit += 2;
        Ok(unit)
    }
}

// ============================================================================
// Position tracking
// ============================================================================

/// Forwards writes and counts bytes, so tree addresses can be recorded on sinks
/// that cannot seek (pipes, gzip encoders).
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, written: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn shorts(values: &[usize]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = ShortIntWriter::new();
        for &v in values {
            writer.write(&mut out, v).unwrap();
        }
        writer.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn ints_switch_width_at_254() {
        let mut out = Vec::new();
        write_int(&mut out, 253).unwrap();
        write_int(&mut out, 254).unwrap();
        write_int(&mut out, 70_000).unwrap();
        assert_eq!(out[0], 253);
        assert_eq!(&out[1..6], &[254, 254, 0, 0, 0]);
        assert_eq!(&out[6..], &[254, 0x70, 0x11, 0x01, 0x00]);

        let mut input = Cursor::new(out);
        assert_eq!(read_int(&mut input).unwrap(), 253);
        assert_eq!(read_int(&mut input).unwrap(), 254);
        assert_eq!(read_int(&mut input).unwrap(), 70_000);
        assert!(matches!(
            read_int(&mut input),
            Err(BinaryError::UnexpectedEof { position: 11 })
        ));
    }

    #[test]
    fn strings_are_utf16_units() {
        let mut out = Vec::new();
        write_string(&mut out, "Aé😀").unwrap();
        // 4 units: 'A', 'é', and a surrogate pair written as wide ints
        assert_eq!(&out[..3], &[4, 0x41, 0xE9]);
        assert_eq!(out.len(), 3 + 5 + 5);
        assert_eq!(read_string(&mut Cursor::new(out)).unwrap(), "Aé😀");
    }

    #[test]
    fn lone_surrogate_is_rejected() {
        let mut out = Vec::new();
        write_int(&mut out, 1).unwrap();
        write_int(&mut out, 0xD800).unwrap();
        assert!(matches!(
            read_string(&mut Cursor::new(out)),
            Err(BinaryError::InvalidString { position: 0 })
        ));
    }

    #[test]
    fn short_int_codes() {
        assert_eq!(shorts(&[0, 2, 3, 0]), vec![0b00_10_01_00]);
        assert_eq!(shorts(&[1]), vec![0b0011]);
        assert_eq!(shorts(&[4, 5]), vec![0b10_11_01_11]);
        // a trailing partial byte is padded with zeros
        assert_eq!(shorts(&[2]), vec![0b01]);
    }

    #[test]
    fn short_int_escape_pads_to_byte() {
        // escape after three units: 11 lands in bits 6-7, then 11 opens a new byte
        assert_eq!(shorts(&[2, 2, 2, 9]), vec![0b11_01_01_01, 0b11, 9]);
        // escape after two units fills the byte exactly
        assert_eq!(shorts(&[2, 2, 300, 0]), vec![0b11_11_01_01, 254, 44, 1, 0, 0, 0]);
        // escape at the start of a byte
        assert_eq!(shorts(&[6]), vec![0b1111, 6]);
    }

    #[test]
    fn short_int_reader_stops_after_last_used_byte() {
        let values = [2, 0, 1, 4, 7, 3, 5, 0, 0, 400, 2];
        let mut bytes = shorts(&values);
        bytes.push(0xAA);
        let mut input = Cursor::new(bytes);
        let mut reader = ShortIntReader::new();
        for &v in &values {
            assert_eq!(reader.read(&mut input).unwrap(), v);
        }
        assert_eq!(read_byte(&mut input).unwrap(), 0xAA);
    }

    #[test]
    fn counting_writer_tracks_offsets() {
        let mut out = CountingWriter::new(Vec::new());
        write_f64(&mut out, 1.5).unwrap();
        write_i64(&mut out, 42).unwrap();
        assert_eq!(out.position(), 16);
        let bytes = out.into_inner();
        let mut input = Cursor::new(bytes);
        assert_eq!(read_f64(&mut input).unwrap(), 1.5);
        assert_eq!(read_i64(&mut input).unwrap(), 42);
    }
}
