//! Zig-zag variable-length integers, the encoding used for every `int`, `long`,
//! length prefix and block count in the container format.

use std::io::{self, Read, Write};

/// Longest encoding of a 64-bit value: ceil(64 / 7).
const MAX_LONG_BYTES: u32 = 10;

/// Read one zig-zag encoded `long`.
///
/// Returns `UnexpectedEof` when the input ends mid-value and `InvalidData` when
/// the encoding runs past ten bytes.
pub fn read_long<R: Read + ?Sized>(r: &mut R) -> io::Result<i64> {
    let mut x: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..MAX_LONG_BYTES {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf)?;
        let b = buf[0];
        x |= ((b & 0x7F) as u64) << shift;
        if b < 0x80 {
            return Ok(((x >> 1) as i64) ^ -((x & 1) as i64));
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint longer than 10 bytes",
    ))
}

/// Read a zig-zag `int`, rejecting values outside the 32-bit range.
pub fn read_int<R: Read + ?Sized>(r: &mut R) -> io::Result<i32> {
    let v = read_long(r)?;
    i32::try_from(v).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("int value {v} out of 32-bit range"),
        )
    })
}

/// Write `value` as a zig-zag varint.
pub fn write_long<W: Write + ?Sized>(w: &mut W, value: i64) -> io::Result<()> {
    let mut x = ((value << 1) ^ (value >> 63)) as u64;
    while x >= 0x80 {
        w.write_all(&[(x as u8) | 0x80])?;
        x >>= 7;
    }
    w.write_all(&[x as u8])
}
