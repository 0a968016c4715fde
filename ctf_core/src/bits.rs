//! Bit-level and varint primitives shared by the column codecs and the
//! table serializer.

use crate::error::{CtfError, Result};

/// MSB-first bit writer. The final byte is zero-padded by [`BitWriter::finish`].
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            acc: 0,
            nbits: 0,
        }
    }

    /// Append the low `len` bits of `value`, most significant first.
    pub fn write(&mut self, value: u64, len: u32) {
        debug_assert!(len <= 64);
        if len > 32 {
            self.write_small(value >> 32, len - 32);
            self.write_small(value & 0xFFFF_FFFF, 32);
        } else {
            self.write_small(value, len);
        }
    }

    fn write_small(&mut self, value: u64, len: u32) {
        if len == 0 {
            return;
        }
        let mask = (1u64 << len) - 1;
        self.acc = (self.acc << len) | (value & mask);
        self.nbits += len;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.buf.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    /// Bits written so far.
    pub fn bit_len(&self) -> u64 {
        self.buf.len() as u64 * 8 + self.nbits as u64
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.buf.push((self.acc << (8 - self.nbits)) as u8);
        }
        self.buf
    }
}

/// MSB-first bit reader over a borrowed byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    next_byte: usize,
    acc: u64,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next_byte: 0,
            acc: 0,
            nbits: 0,
        }
    }

    fn refill(&mut self) {
        while self.nbits <= 56 && self.next_byte < self.data.len() {
            self.acc |= (self.data[self.next_byte] as u64) << (56 - self.nbits);
            self.next_byte += 1;
            self.nbits += 8;
        }
    }

    /// Bits still available.
    pub fn remaining(&self) -> u64 {
        (self.data.len() - self.next_byte) as u64 * 8 + self.nbits as u64
    }

    /// Look at the next `len` (<= 32) bits without consuming them. Missing
    /// bits past the end of the stream read as zero.
    pub fn peek(&mut self, len: u32) -> u64 {
        debug_assert!(len <= 32);
        if len == 0 {
            return 0;
        }
        self.refill();
        self.acc >> (64 - len)
    }

    /// Consume `len` bits previously inspected with [`BitReader::peek`].
    pub fn consume(&mut self, len: u32) -> Result<()> {
        if len > self.nbits {
            return Err(CtfError::truncated("bitstream ended inside a code"));
        }
        self.acc = if len == 64 { 0 } else { self.acc << len };
        self.nbits -= len;
        Ok(())
    }

    /// Read `len` (<= 64) bits as an unsigned integer.
    pub fn read(&mut self, len: u32) -> Result<u64> {
        if len > 32 {
            let hi = self.read_small(len - 32)?;
            let lo = self.read_small(32)?;
            Ok((hi << 32) | lo)
        } else {
            self.read_small(len)
        }
    }

    fn read_small(&mut self, len: u32) -> Result<u64> {
        if len == 0 {
            return Ok(0);
        }
        let value = self.peek(len);
        self.consume(len)?;
        Ok(value)
    }

    /// Require the stream to be used up: only the zero padding of the final
    /// byte may remain.
    pub fn finish(mut self) -> Result<()> {
        let left = self.remaining();
        if left >= 8 {
            return Err(CtfError::CorruptBlock(format!(
                "{} payload bytes left unread",
                left / 8
            )));
        }
        if self.peek(left as u32) != 0 {
            return Err(CtfError::CorruptBlock("non-zero padding bits".into()));
        }
        Ok(())
    }
}

// ── LEB128 varints ──────────────────────────────────────────────────────────

pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode one varint at `*pos`, advancing it. `None` on truncation or on an
/// encoding longer than ten bytes.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    for shift in (0..70).step_by(7) {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return None;
        }
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Largest number of bytes a varint can occupy for a value of `bits` bits.
pub fn varint_max_len(bits: u32) -> usize {
    (bits.max(1) as usize + 6) / 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_pads_final_byte_with_zeros() {
        let mut w = BitWriter::default();
        w.write(0b101, 3);
        assert_eq!(w.bit_len(), 3);
        assert_eq!(w.finish(), vec![0b1010_0000]);
    }

    #[test]
    fn wide_values_survive_split_writes() {
        let mut w = BitWriter::default();
        w.write(1, 1);
        w.write(0xDEAD_BEEF_CAFE_F00D, 64);
        w.write(0x3, 2);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(1).unwrap(), 1);
        assert_eq!(r.read(64).unwrap(), 0xDEAD_BEEF_CAFE_F00D);
        assert_eq!(r.read(2).unwrap(), 3);
    }

    #[test]
    fn reading_past_the_end_is_truncation() {
        let mut r = BitReader::new(&[0xff]);
        assert_eq!(r.read(8).unwrap(), 0xff);
        assert!(matches!(r.read(1), Err(CtfError::TruncatedBuffer(_))));
    }

    #[test]
    fn finish_requires_an_exhausted_stream() {
        let mut r = BitReader::new(&[0b1010_0000]);
        assert_eq!(r.read(3).unwrap(), 0b101);
        assert!(r.finish().is_ok());

        let mut r = BitReader::new(&[0b1010_0001]);
        r.read(3).unwrap();
        assert!(matches!(r.finish(), Err(CtfError::CorruptBlock(_))));

        let mut r = BitReader::new(&[0xff, 0x00]);
        r.read(8).unwrap();
        assert!(matches!(r.finish(), Err(CtfError::CorruptBlock(_))));
    }

    #[test]
    fn varint_rejects_overlong_and_truncated_input() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), 10);
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos), Some(u64::MAX));
        assert_eq!(pos, 10);

        let mut pos = 0;
        assert_eq!(read_varint(&buf[..4], &mut pos), None);

        let overlong = [0xffu8; 11];
        let mut pos = 0;
        assert_eq!(read_varint(&overlong, &mut pos), None);
    }

    #[test]
    fn varint_max_len_covers_widths() {
        assert_eq!(varint_max_len(8), 2);
        assert_eq!(varint_max_len(16), 3);
        assert_eq!(varint_max_len(32), 5);
        assert_eq!(varint_max_len(64), 10);
    }
}
