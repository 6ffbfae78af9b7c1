//! Bit-precise reader/writer over byte streams.
//!
//! Bits are numbered logically: the first bit taken from a byte is logical bit 0
//! and becomes the least significant bit of the value being assembled. With
//! [`BitOrder::Lsb0`] logical bit 0 is physical bit 0 of the byte; with
//! [`BitOrder::Msb0`] it is physical bit 7. Multi-byte values are built from
//! whole logical bytes and then assembled according to [`Endianness`].

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{ErrorKind, Read, Write};

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Which physical bit of a byte is consumed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    Lsb0,
    Msb0,
}

impl BitOrder {
    /// Physical byte as seen in logical bit order (and back; the mapping is an involution).
    #[inline]
    fn logical(self, b: u8) -> u8 {
        match self {
            BitOrder::Lsb0 => b,
            BitOrder::Msb0 => b.reverse_bits(),
        }
    }
}

#[inline]
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn check_width(width: u32) -> Result<()> {
    if width == 0 || width > 64 {
        return Err(Error::Structural(format!("bit width {} out of range 1..=64", width)));
    }
    Ok(())
}

/// Reads bits and bytes from any [`Read`] source, one byte of lookahead.
pub struct BitReader<R> {
    inner: R,
    lookahead: Option<u8>,
    cur: u8,
    /// Bits of `cur` already consumed; 8 means no byte is buffered.
    used: u32,
    bit_counter: u64,
    byte_counter: u64,
    /// Bytes fetched since creation; unaffected by counter resets.
    fetched: u64,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        BitReader {
            inner,
            lookahead: None,
            cur: 0,
            used: 8,
            bit_counter: 0,
            byte_counter: 0,
            fetched: 0,
        }
    }

    fn pull(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.lookahead.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if self.lookahead.is_none() {
            self.lookahead = self.pull()?;
        }
        Ok(self.lookahead)
    }

    /// Read `width` (1..=64) bits; the first bit read is the value's least significant bit.
    pub fn read_bits(&mut self, width: u32, order: BitOrder) -> Result<u64> {
        check_width(width)?;
        let mut out = 0u64;
        let mut filled = 0u32;
        while filled < width {
            if self.used == 8 {
                match self.pull()? {
                    Some(b) => {
                        self.cur = b;
                        self.used = 0;
                        self.byte_counter += 1;
                        self.fetched += 1;
                    }
                    None => {
                        return Err(Error::Exhausted(format!(
                            "needed {} bits, only {} available",
                            width, filled
                        )))
                    }
                }
            }
            let take = (8 - self.used).min(width - filled);
            let chunk = (order.logical(self.cur) >> self.used) as u64 & mask(take);
            out |= chunk << filled;
            self.used += take;
            filled += take;
        }
        self.bit_counter += width as u64;
        Ok(out)
    }

    pub fn read_byte(&mut self, order: BitOrder) -> Result<u8> {
        if self.used == 8 {
            let b = self
                .pull()?
                .ok_or_else(|| Error::Exhausted("needed 8 bits, only 0 available".to_string()))?;
            self.byte_counter += 1;
            self.fetched += 1;
            self.bit_counter += 8;
            return Ok(order.logical(b));
        }
        Ok(self.read_bits(8, order)? as u8)
    }

    pub fn read_bytes(&mut self, n: usize, order: BitOrder) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(4096));
        if self.used != 8 {
            for _ in 0..n {
                out.push(self.read_byte(order)?);
            }
            return Ok(out);
        }
        // aligned: take the lookahead byte, then the rest in one read
        if n > 0 {
            if let Some(b) = self.lookahead.take() {
                out.push(b);
            }
        }
        let want = (n - out.len()) as u64;
        (&mut self.inner).take(want).read_to_end(&mut out)?;
        let got = out.len() as u64;
        self.byte_counter += got;
        self.fetched += got;
        self.bit_counter += got * 8;
        if out.len() < n {
            return Err(Error::Exhausted(format!("needed {} bytes, only {} available", n, out.len())));
        }
        if order == BitOrder::Msb0 {
            out.iter_mut().for_each(|b| *b = b.reverse_bits());
        }
        Ok(out)
    }

    /// Length-prefixed UTF-8 text. A prefix below 0x80 is the length itself,
    /// `0x8n` is followed by an `n`-byte big-endian length and 0xFF marks a
    /// null string. Only the shortest length encoding is accepted.
    pub fn read_string(&mut self, order: BitOrder) -> Result<Option<String>> {
        let prefix = self.read_byte(order)?;
        let len = match prefix {
            0xFF => return Ok(None),
            0x00..=0x7F => prefix as usize,
            0x81..=0x84 => {
                let n = (prefix & 0x0F) as usize;
                let mut buf = [0u8; 4];
                for b in buf[4 - n..].iter_mut() {
                    *b = self.read_byte(order)?;
                }
                let len = BigEndian::read_u32(&buf) as usize;
                if len < 0x80 || buf[4 - n] == 0 {
                    return Err(Error::Structural(format!(
                        "string length {} is not in its shortest encoding",
                        len
                    )));
                }
                len
            }
            other => {
                return Err(Error::Structural(format!("invalid string length prefix {:#04x}", other)));
            }
        };
        let bytes = self.read_bytes(len, order)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| Error::Structural(format!("string is not valid UTF-8: {}", e)))
    }

    fn read_array<const N: usize>(&mut self, order: BitOrder) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        for b in buf.iter_mut() {
            *b = self.read_byte(order)?;
        }
        Ok(buf)
    }

    pub fn read_u16(&mut self, endianness: Endianness, order: BitOrder) -> Result<u16> {
        let buf = self.read_array::<2>(order)?;
        Ok(match endianness {
            Endianness::Big => BigEndian::read_u16(&buf),
            Endianness::Little => LittleEndian::read_u16(&buf),
        })
    }

    pub fn read_u32(&mut self, endianness: Endianness, order: BitOrder) -> Result<u32> {
        let buf = self.read_array::<4>(order)?;
        Ok(match endianness {
            Endianness::Big => BigEndian::read_u32(&buf),
            Endianness::Little => LittleEndian::read_u32(&buf),
        })
    }

    pub fn read_u64(&mut self, endianness: Endianness, order: BitOrder) -> Result<u64> {
        let buf = self.read_array::<8>(order)?;
        Ok(match endianness {
            Endianness::Big => BigEndian::read_u64(&buf),
            Endianness::Little => LittleEndian::read_u64(&buf),
        })
    }

    pub fn read_f32(&mut self, endianness: Endianness, order: BitOrder) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(endianness, order)?))
    }

    pub fn read_f64(&mut self, endianness: Endianness, order: BitOrder) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(endianness, order)?))
    }

    /// Drop the unread bits of the current byte.
    fn discard_partial(&mut self) {
        if self.used < 8 {
            self.bit_counter += (8 - self.used) as u64;
            self.used = 8;
        }
    }

    /// Discard the partial byte, then skip bytes until `byte_counter` is a multiple of `n`.
    pub fn align(&mut self, n: u64) -> Result<()> {
        self.discard_partial();
        if n > 1 {
            while self.byte_counter % n != 0 {
                self.read_byte(BitOrder::Lsb0)?;
            }
        }
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.read_byte(BitOrder::Lsb0)?;
        }
        Ok(())
    }

    /// Drop any partial byte and zero both counters.
    pub fn reset_counter(&mut self) {
        self.used = 8;
        self.bit_counter = 0;
        self.byte_counter = 0;
    }

    /// No buffered bits remain and the source has no further byte.
    pub fn is_exhausted(&mut self) -> Result<bool> {
        Ok(self.used == 8 && self.peek()?.is_none())
    }

    /// True when another `width`-bit element cannot start: the source has no
    /// further byte and fewer than `width` bits remain buffered. Those trailing
    /// bits must be the zero padding a writer flush produces; anything else is
    /// an [`Error::Exhausted`].
    pub fn at_end_for(&mut self, width: u32, order: BitOrder) -> Result<bool> {
        if self.peek()?.is_some() {
            return Ok(false);
        }
        let remaining = 8 - self.used;
        if remaining >= width {
            return Ok(false);
        }
        if remaining > 0 && order.logical(self.cur) >> self.used != 0 {
            return Err(Error::Exhausted(format!(
                "{} trailing bits are not zero padding",
                remaining
            )));
        }
        Ok(true)
    }

    pub fn bit_counter(&self) -> u64 {
        self.bit_counter
    }

    /// Bytes fetched from the source since creation or the last reset.
    pub fn byte_counter(&self) -> u64 {
        self.byte_counter
    }

    /// Bytes taken from the source over the reader's whole life.
    pub fn fetched_bytes(&self) -> u64 {
        self.fetched
    }

    /// Bits left in the buffered byte.
    pub fn buffered_bits(&self) -> u32 {
        8 - self.used
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes bits and bytes to any [`Write`] sink. Only whole bytes reach the sink;
/// a partial byte stays buffered until [`BitWriter::flush_bits`].
pub struct BitWriter<W> {
    inner: W,
    cur: u8,
    /// Bits of `cur` already filled.
    used: u32,
    bit_counter: u64,
    byte_counter: u64,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        BitWriter {
            inner,
            cur: 0,
            used: 0,
            bit_counter: 0,
            byte_counter: 0,
        }
    }

    fn emit(&mut self, b: u8) -> Result<()> {
        self.inner.write_all(&[b])?;
        self.byte_counter += 1;
        Ok(())
    }

    /// Write the low `width` (1..=64) bits of `value`, least significant bit first.
    pub fn write_bits(&mut self, value: u64, width: u32, order: BitOrder) -> Result<()> {
        check_width(width)?;
        let mut written = 0u32;
        while written < width {
            let take = (8 - self.used).min(width - written);
            let chunk = ((value >> written) & mask(take)) as u8;
            self.cur |= order.logical(chunk << self.used);
            self.used += take;
            written += take;
            if self.used == 8 {
                let b = self.cur;
                self.cur = 0;
                self.used = 0;
                self.emit(b)?;
            }
        }
        self.bit_counter += width as u64;
        Ok(())
    }

    pub fn write_byte(&mut self, b: u8, order: BitOrder) -> Result<()> {
        if self.used == 0 {
            self.emit(order.logical(b))?;
            self.bit_counter += 8;
            return Ok(());
        }
        self.write_bits(b as u64, 8, order)
    }

    pub fn write_bytes(&mut self, bytes: &[u8], order: BitOrder) -> Result<()> {
        for &b in bytes {
            self.write_byte(b, order)?;
        }
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16, endianness: Endianness, order: BitOrder) -> Result<()> {
        let mut buf = [0u8; 2];
        match endianness {
            Endianness::Big => BigEndian::write_u16(&mut buf, v),
            Endianness::Little => LittleEndian::write_u16(&mut buf, v),
        }
        self.write_bytes(&buf, order)
    }

    pub fn write_u32(&mut self, v: u32, endianness: Endianness, order: BitOrder) -> Result<()> {
        let mut buf = [0u8; 4];
        match endianness {
            Endianness::Big => BigEndian::write_u32(&mut buf, v),
            Endianness::Little => LittleEndian::write_u32(&mut buf, v),
        }
        self.write_bytes(&buf, order)
    }

    pub fn write_u64(&mut self, v: u64, endianness: Endianness, order: BitOrder) -> Result<()> {
        let mut buf = [0u8; 8];
        match endianness {
            Endianness::Big => BigEndian::write_u64(&mut buf, v),
            Endianness::Little => LittleEndian::write_u64(&mut buf, v),
        }
        self.write_bytes(&buf, order)
    }

    pub fn write_f32(&mut self, v: f32, endianness: Endianness, order: BitOrder) -> Result<()> {
        self.write_u32(v.to_bits(), endianness, order)
    }

    pub fn write_f64(&mut self, v: f64, endianness: Endianness, order: BitOrder) -> Result<()> {
        self.write_u64(v.to_bits(), endianness, order)
    }

    /// Emit the partial byte, zero-padded. The padding is not counted in `bit_counter`.
    pub fn flush_bits(&mut self) -> Result<()> {
        if self.used > 0 {
            let b = self.cur;
            self.cur = 0;
            self.used = 0;
            self.emit(b)?;
        }
        Ok(())
    }

    /// Counterpart of [`BitReader::read_string`].
    pub fn write_string(&mut self, text: Option<&str>, order: BitOrder) -> Result<()> {
        let Some(text) = text else {
            return self.write_byte(0xFF, order);
        };
        let len = text.len();
        if len < 0x80 {
            self.write_byte(len as u8, order)?;
        } else {
            let len = u32::try_from(len)
                .map_err(|_| Error::Structural(format!("string of {} bytes is too long", len)))?;
            let mut buf = [0u8; 4];
            BigEndian::write_u32(&mut buf, len);
            let skip = buf.iter().take_while(|&&b| b == 0).count();
            self.write_byte(0x80 | (4 - skip) as u8, order)?;
            self.write_bytes(&buf[skip..], order)?;
        }
        self.write_bytes(text.as_bytes(), order)
    }

    /// Zero-fill the partial byte, then emit zero bytes until `byte_counter` is a multiple of `n`.
    pub fn align(&mut self, n: u64) -> Result<()> {
        if self.used > 0 {
            self.bit_counter += (8 - self.used) as u64;
            self.flush_bits()?;
        }
        if n > 1 {
            while self.byte_counter % n != 0 {
                self.write_byte(0, BitOrder::Lsb0)?;
            }
        }
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.write_byte(0, BitOrder::Lsb0)?;
        }
        Ok(())
    }

    /// Flush any partial byte and zero both counters.
    pub fn reset_counter(&mut self) -> Result<()> {
        self.flush_bits()?;
        self.bit_counter = 0;
        self.byte_counter = 0;
        Ok(())
    }

    pub fn bit_counter(&self) -> u64 {
        self.bit_counter
    }

    /// Whole bytes handed to the sink since creation or the last reset.
    pub fn byte_counter(&self) -> u64 {
        self.byte_counter
    }

    /// Bytes emitted plus a pending partial byte, matching what a reader of
    /// the same data reports through [`BitReader::byte_counter`].
    pub fn stream_counter(&self) -> u64 {
        self.byte_counter + u64::from(self.used > 0)
    }

    /// Flush the partial byte and the sink, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        self.flush_bits()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsb0_splits_byte_low_bits_first() {
        let data = [0b1011_0001u8];
        let mut r = BitReader::new(&data[..]);
        assert_eq!(r.read_bits(3, BitOrder::Lsb0).unwrap(), 0b001);
        assert_eq!(r.read_bits(5, BitOrder::Lsb0).unwrap(), 0b10110);
        assert!(r.is_exhausted().unwrap());
    }

    #[test]
    fn msb0_takes_high_bit_first() {
        let data = [0b1000_0000u8];
        let mut r = BitReader::new(&data[..]);
        assert_eq!(r.read_bits(1, BitOrder::Msb0).unwrap(), 1);
        assert_eq!(r.read_bits(7, BitOrder::Msb0).unwrap(), 0);
    }

    #[test]
    fn bit_order_symmetry_for_all_widths() {
        for order in [BitOrder::Lsb0, BitOrder::Msb0] {
            for width in 1..=8u32 {
                for b in 0..=255u64 {
                    let v = b & mask(width);
                    let mut w = BitWriter::new(Vec::new());
                    w.write_bits(v, width, order).unwrap();
                    let bytes = w.finish().unwrap();
                    assert_eq!(bytes.len(), 1);
                    let mut r = BitReader::new(&bytes[..]);
                    assert_eq!(r.read_bits(width, order).unwrap(), v, "w={} b={} {:?}", width, b, order);
                }
            }
        }
    }

    #[test]
    fn read_crosses_byte_boundary() {
        let data = [0xF0u8, 0x0F];
        let mut r = BitReader::new(&data[..]);
        assert_eq!(r.read_bits(4, BitOrder::Lsb0).unwrap(), 0x0);
        assert_eq!(r.read_bits(8, BitOrder::Lsb0).unwrap(), 0xFF);
        assert_eq!(r.read_bits(4, BitOrder::Lsb0).unwrap(), 0x0);
        assert_eq!(r.bit_counter(), 16);
        assert_eq!(r.byte_counter(), 2);
    }

    #[test]
    fn unaligned_multibyte_read() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(1, 1, BitOrder::Lsb0).unwrap();
        w.write_u16(0xABCD, Endianness::Little, BitOrder::Lsb0).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), 3);
        let mut r = BitReader::new(&bytes[..]);
        assert_eq!(r.read_bits(1, BitOrder::Lsb0).unwrap(), 1);
        assert_eq!(r.read_u16(Endianness::Little, BitOrder::Lsb0).unwrap(), 0xABCD);
    }

    #[test]
    fn endianness_assembles_bytes() {
        let data = [0x12u8, 0x34, 0x12, 0x34];
        let mut r = BitReader::new(&data[..]);
        assert_eq!(r.read_u16(Endianness::Big, BitOrder::Lsb0).unwrap(), 0x1234);
        assert_eq!(r.read_u16(Endianness::Little, BitOrder::Lsb0).unwrap(), 0x3412);
    }

    #[test]
    fn counters_track_exact_bits() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bits(0b101, 3, BitOrder::Lsb0).unwrap();
        assert_eq!(w.bit_counter(), 3);
        assert_eq!(w.byte_counter(), 0);
        w.write_bits(0xFF, 8, BitOrder::Lsb0).unwrap();
        assert_eq!(w.bit_counter(), 11);
        assert_eq!(w.byte_counter(), 1);
        w.flush_bits().unwrap();
        assert_eq!(w.bit_counter(), 11);
        assert_eq!(w.byte_counter(), 2);
        assert_eq!(w.finish().unwrap(), vec![0b1111_1101, 0b0000_0111]);

        let data = [0u8; 3];
        let mut r = BitReader::new(&data[..]);
        r.read_bits(3, BitOrder::Lsb0).unwrap();
        assert_eq!((r.bit_counter(), r.byte_counter()), (3, 1));
        r.read_bits(13, BitOrder::Msb0).unwrap();
        assert_eq!((r.bit_counter(), r.byte_counter()), (16, 2));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let data = [0x01u8];
        let mut r = BitReader::new(&data[..]);
        assert!(matches!(r.read_u16(Endianness::Big, BitOrder::Lsb0), Err(Error::Exhausted(_))));
    }

    #[test]
    fn at_end_accepts_only_zero_padding() {
        let data = [0b0011_1111u8];
        let mut r = BitReader::new(&data[..]);
        assert!(!r.at_end_for(3, BitOrder::Lsb0).unwrap());
        r.read_bits(3, BitOrder::Lsb0).unwrap();
        r.read_bits(3, BitOrder::Lsb0).unwrap();
        assert!(r.at_end_for(3, BitOrder::Lsb0).unwrap());
        assert!(!r.at_end_for(2, BitOrder::Lsb0).unwrap());
        assert!(!r.is_exhausted().unwrap());

        let data = [0xFFu8];
        let mut r = BitReader::new(&data[..]);
        r.read_bits(6, BitOrder::Lsb0).unwrap();
        assert!(matches!(r.at_end_for(3, BitOrder::Lsb0), Err(Error::Exhausted(_))));

        // msb0 padding sits in the low physical bits
        let data = [0b1111_1100u8];
        let mut r = BitReader::new(&data[..]);
        r.read_bits(6, BitOrder::Msb0).unwrap();
        assert!(r.at_end_for(3, BitOrder::Msb0).unwrap());
    }

    #[test]
    fn aligned_byte_runs_are_read_in_bulk() {
        let data = [1u8, 2, 3, 4, 5];
        let mut r = BitReader::new(&data[..]);
        assert!(!r.is_exhausted().unwrap());
        assert_eq!(r.read_bytes(3, BitOrder::Lsb0).unwrap(), vec![1, 2, 3]);
        assert_eq!(r.read_bytes(1, BitOrder::Msb0).unwrap(), vec![0x20]);
        assert_eq!((r.byte_counter(), r.fetched_bytes(), r.bit_counter()), (4, 4, 32));
        assert!(matches!(r.read_bytes(2, BitOrder::Lsb0), Err(Error::Exhausted(_))));
    }

    #[test]
    fn strings_use_shortest_length_prefix() {
        let long = "x".repeat(300);
        let mut w = BitWriter::new(Vec::new());
        w.write_string(Some("hi"), BitOrder::Lsb0).unwrap();
        w.write_string(None, BitOrder::Lsb0).unwrap();
        w.write_string(Some(""), BitOrder::Lsb0).unwrap();
        w.write_string(Some(&long), BitOrder::Lsb0).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(&bytes[..6], &[2, b'h', b'i', 0xFF, 0, 0x82]);
        assert_eq!(&bytes[6..8], &[0x01, 0x2C]);

        let mut r = BitReader::new(&bytes[..]);
        assert_eq!(r.read_string(BitOrder::Lsb0).unwrap().as_deref(), Some("hi"));
        assert_eq!(r.read_string(BitOrder::Lsb0).unwrap(), None);
        assert_eq!(r.read_string(BitOrder::Lsb0).unwrap().as_deref(), Some(""));
        assert_eq!(r.read_string(BitOrder::Lsb0).unwrap(), Some(long));
        assert!(r.is_exhausted().unwrap());

        for bad in [&[0x81u8, 0x05][..], &[0x82, 0x00, 0x90][..], &[0x90][..], &[0x01, 0xC3][..]] {
            let mut r = BitReader::new(bad);
            assert!(matches!(r.read_string(BitOrder::Lsb0), Err(Error::Structural(_))), "{:?}", bad);
        }
    }

    #[test]
    fn align_and_reset() {
        let data = [0xAAu8, 1, 2, 3, 4];
        let mut r = BitReader::new(&data[..]);
        r.read_bits(2, BitOrder::Lsb0).unwrap();
        r.align(4).unwrap();
        assert_eq!(r.byte_counter(), 4);
        r.reset_counter();
        assert_eq!(r.read_byte(BitOrder::Lsb0).unwrap(), 4);
        assert_eq!(r.byte_counter(), 1);

        let mut w = BitWriter::new(Vec::new());
        w.write_bits(1, 1, BitOrder::Lsb0).unwrap();
        w.align(3).unwrap();
        assert_eq!(w.finish().unwrap(), vec![1, 0, 0]);
    }

    #[test]
    fn msb0_whole_bytes_are_bit_reversed() {
        let mut w = BitWriter::new(Vec::new());
        w.write_byte(0x01, BitOrder::Msb0).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes, vec![0x80]);
        let mut r = BitReader::new(&bytes[..]);
        assert_eq!(r.read_byte(BitOrder::Msb0).unwrap(), 0x01);
    }
}
