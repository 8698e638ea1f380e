//! Resumable packet-stream reader.
//!
//! A [`ReadBuffer`] is a byte cursor over a queue of DATA packet bodies.
//! Typed readers fail with [`Error::OutOfPackets`] when the queue runs dry;
//! a caller records a [`RestorePoint`] before attempting a message decode
//! and rewinds on that error so the same input plus a newly arrived packet
//! replays cleanly. This is the mechanism that lets a decode suspend in the
//! middle of a message and resume after more bytes arrive.

use bytes::Bytes;

use crate::error::{Error, Result};

/// A saved cursor position. Valid for the buffer it came from as long as no
/// segments have been reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePoint {
    seg: usize,
    off: usize,
}

/// Byte cursor over a sequence of packet-body segments.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    segments: Vec<Bytes>,
    seg: usize,
    off: usize,
}

impl ReadBuffer {
    /// An empty buffer awaiting packets.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer over a single contiguous segment. Used by codec tests and
    /// for parsing single-packet payloads.
    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            segments: vec![data],
            seg: 0,
            off: 0,
        }
    }

    /// A buffer over a copied slice.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Append the body of a newly received packet.
    pub fn push_segment(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.segments.push(data);
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        let mut total = 0;
        for (i, s) in self.segments.iter().enumerate().skip(self.seg) {
            total += if i == self.seg {
                s.len() - self.off
            } else {
                s.len()
            };
        }
        total
    }

    /// True when no unread bytes remain.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Record the current position.
    pub fn save(&self) -> RestorePoint {
        RestorePoint {
            seg: self.seg,
            off: self.off,
        }
    }

    /// Rewind to a previously saved position.
    pub fn restore(&mut self, point: RestorePoint) {
        self.seg = point.seg;
        self.off = point.off;
    }

    /// Drop everything and start over. Invalidates restore points.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.seg = 0;
        self.off = 0;
    }

    #[inline]
    fn advance_segment(&mut self) {
        while self.seg < self.segments.len() && self.off >= self.segments[self.seg].len() {
            self.seg += 1;
            self.off = 0;
        }
    }

    // =========================================================================
    // Primitive reads
    // =========================================================================

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.advance_segment();
        if self.seg >= self.segments.len() {
            return Err(Error::OutOfPackets);
        }
        let b = self.segments[self.seg][self.off];
        self.off += 1;
        Ok(b)
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&mut self) -> Result<u8> {
        let save = self.save();
        let b = self.read_u8();
        self.restore(save);
        b
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            self.advance_segment();
            if self.seg >= self.segments.len() {
                return Err(Error::OutOfPackets);
            }
            let avail = self.segments[self.seg].len() - self.off;
            let step = avail.min(n);
            self.off += step;
            n -= step;
        }
        Ok(())
    }

    /// Read exactly `n` bytes. Zero-copy when the run lies within a single
    /// segment.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        self.advance_segment();
        if self.seg >= self.segments.len() {
            return Err(Error::OutOfPackets);
        }
        let avail = self.segments[self.seg].len() - self.off;
        if avail >= n {
            let out = self.segments[self.seg].slice(self.off..self.off + n);
            self.off += n;
            return Ok(out);
        }
        // Crosses a segment boundary; gather.
        if self.remaining() < n {
            return Err(Error::OutOfPackets);
        }
        let mut out = Vec::with_capacity(n);
        let mut left = n;
        while left > 0 {
            self.advance_segment();
            let seg = &self.segments[self.seg];
            let step = (seg.len() - self.off).min(left);
            out.extend_from_slice(&seg[self.off..self.off + step]);
            self.off += step;
            left -= step;
        }
        Ok(Bytes::from(out))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Read a big-endian u16.
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    /// Read a big-endian u32.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }

    /// Read a big-endian u64.
    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array::<8>()?))
    }

    // =========================================================================
    // Length-prefixed integers (UB family)
    // =========================================================================

    fn read_ub_length(&mut self) -> Result<(usize, bool)> {
        let b = self.read_u8()?;
        Ok(((b & 0x7f) as usize, (b & 0x80) != 0))
    }

    fn read_ub_raw(&mut self, len: usize, max: usize) -> Result<u64> {
        if len > max {
            return Err(Error::Protocol(format!(
                "integer length {len} exceeds maximum {max}"
            )));
        }
        let mut value = 0u64;
        for _ in 0..len {
            value = (value << 8) | self.read_u8()? as u64;
        }
        Ok(value)
    }

    /// Read a length-prefixed u16.
    pub fn read_ub2(&mut self) -> Result<u16> {
        let (len, _) = self.read_ub_length()?;
        Ok(self.read_ub_raw(len, 2)? as u16)
    }

    /// Read a length-prefixed i16; the high bit of the length byte carries
    /// the sign.
    pub fn read_sb2(&mut self) -> Result<i16> {
        let (len, negative) = self.read_ub_length()?;
        let value = self.read_ub_raw(len, 2)? as i16;
        Ok(if negative { -value } else { value })
    }

    /// Read a length-prefixed u32.
    pub fn read_ub4(&mut self) -> Result<u32> {
        let (len, _) = self.read_ub_length()?;
        Ok(self.read_ub_raw(len, 4)? as u32)
    }

    /// Read a length-prefixed u64.
    pub fn read_ub8(&mut self) -> Result<u64> {
        let (len, _) = self.read_ub_length()?;
        self.read_ub_raw(len, 8)
    }

    /// Skip a length-prefixed integer of any width.
    pub fn skip_ub(&mut self) -> Result<()> {
        let (len, _) = self.read_ub_length()?;
        self.skip(len)
    }

    // =========================================================================
    // Length-prefixed values
    // =========================================================================

    /// Read a length-prefixed byte value.
    ///
    /// The first byte selects the form: `0xFF` NULL, `0xFE` chunked (ub4
    /// chunk lengths terminated by zero), `0xFD` escape (next byte is the
    /// length), otherwise the length itself (max 252).
    pub fn read_bytes_with_length(&mut self) -> Result<Option<Vec<u8>>> {
        use crate::constants::length;

        let first = self.read_u8()?;
        match first {
            length::NULL => Ok(None),
            0 => Ok(Some(Vec::new())),
            length::LONG_FORM => {
                let mut out = Vec::new();
                loop {
                    let chunk_len = self.read_ub4()? as usize;
                    if chunk_len == 0 {
                        break;
                    }
                    out.extend_from_slice(&self.read_bytes(chunk_len)?);
                }
                Ok(Some(out))
            }
            length::ESCAPE => {
                let len = self.read_u8()? as usize;
                Ok(Some(self.read_bytes(len)?.to_vec()))
            }
            len => Ok(Some(self.read_bytes(len as usize)?.to_vec())),
        }
    }

    /// Skip a length-prefixed byte value without materializing it.
    pub fn skip_bytes_with_length(&mut self) -> Result<()> {
        use crate::constants::length;

        let first = self.read_u8()?;
        match first {
            length::NULL | 0 => Ok(()),
            length::LONG_FORM => loop {
                let chunk_len = self.read_ub4()? as usize;
                if chunk_len == 0 {
                    return Ok(());
                }
                self.skip(chunk_len)?;
            },
            length::ESCAPE => {
                let len = self.read_u8()? as usize;
                self.skip(len)
            }
            len => self.skip(len as usize),
        }
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str_with_length(&mut self) -> Result<Option<String>> {
        match self.read_bytes_with_length()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Conversion(e.to_string())),
        }
    }

    /// Read a string preceded by a ub4 presence count, the format used for
    /// metadata strings (column names, schema names).
    pub fn read_str_with_ub4_length(&mut self) -> Result<Option<String>> {
        if self.read_ub4()? == 0 {
            return Ok(None);
        }
        self.read_str_with_length()
    }

    /// Read a signed integer in the length-plus-magnitude form used inside
    /// parameter blocks.
    pub fn read_prefixed_int(&mut self) -> Result<i64> {
        let (len, negative) = self.read_ub_length()?;
        let value = self.read_ub_raw(len, 8)? as i64;
        Ok(if negative { -value } else { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_reads() {
        let mut buf = ReadBuffer::from_slice(&[0x42, 0x01, 0x02, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf.read_u8().unwrap(), 0x42);
        assert_eq!(buf.read_u16_be().unwrap(), 0x0102);
        assert_eq!(buf.read_u32_be().unwrap(), 0x01020304);
        assert!(matches!(buf.read_u8(), Err(Error::OutOfPackets)));
    }

    #[test]
    fn reads_across_segment_boundary() {
        let mut buf = ReadBuffer::new();
        buf.push_segment(Bytes::from_static(&[0x01, 0x02]));
        buf.push_segment(Bytes::from_static(&[0x03, 0x04]));
        assert_eq!(buf.read_u32_be().unwrap(), 0x01020304);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn restore_point_replays_after_new_segment() {
        let mut buf = ReadBuffer::new();
        buf.push_segment(Bytes::from_static(&[0x00, 0x00]));

        let save = buf.save();
        // u32 needs four bytes; only two are available.
        assert!(matches!(buf.read_u32_be(), Err(Error::OutOfPackets)));
        buf.restore(save);

        buf.push_segment(Bytes::from_static(&[0x12, 0x34]));
        assert_eq!(buf.read_u32_be().unwrap(), 0x1234);
    }

    #[test]
    fn ub_encodings() {
        // 0 / 1-byte / 2-byte forms
        let mut buf = ReadBuffer::from_slice(&[0x00, 0x01, 0x42, 0x02, 0x01, 0x02]);
        assert_eq!(buf.read_ub2().unwrap(), 0);
        assert_eq!(buf.read_ub2().unwrap(), 0x42);
        assert_eq!(buf.read_ub2().unwrap(), 0x0102);

        let mut buf = ReadBuffer::from_slice(&[0x04, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf.read_ub4().unwrap(), 0x01020304);

        let mut buf = ReadBuffer::from_slice(&[0x03, 0x01, 0x02, 0x03]);
        assert_eq!(buf.read_ub4().unwrap(), 0x010203);

        let mut buf = ReadBuffer::from_slice(&[0x08, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.read_ub8().unwrap(), 0x0102030405060708);
    }

    #[test]
    fn sb2_sign_bit() {
        let mut buf = ReadBuffer::from_slice(&[0x82, 0x01, 0x02]);
        assert_eq!(buf.read_sb2().unwrap(), -258);
        let mut buf = ReadBuffer::from_slice(&[0x02, 0x01, 0x02]);
        assert_eq!(buf.read_sb2().unwrap(), 258);
    }

    #[test]
    fn length_prefixed_null_and_empty() {
        let mut buf = ReadBuffer::from_slice(&[0xFF, 0x00]);
        assert!(buf.read_bytes_with_length().unwrap().is_none());
        assert_eq!(buf.read_bytes_with_length().unwrap().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn length_prefixed_short() {
        let mut buf = ReadBuffer::from_slice(&[0x03, b'a', b'b', b'c']);
        assert_eq!(buf.read_str_with_length().unwrap().unwrap(), "abc");
    }

    #[test]
    fn length_prefixed_chunked() {
        // 0xFE, then ub4(3) + "abc", ub4(2) + "de", ub4(0)
        let mut buf = ReadBuffer::from_slice(&[
            0xFE, 0x01, 0x03, b'a', b'b', b'c', 0x01, 0x02, b'd', b'e', 0x00,
        ]);
        assert_eq!(buf.read_bytes_with_length().unwrap().unwrap(), b"abcde");
    }

    #[test]
    fn chunked_decode_suspends_between_chunks() {
        let mut buf = ReadBuffer::new();
        buf.push_segment(Bytes::from_static(&[0xFE, 0x01, 0x03, b'a', b'b', b'c']));

        let save = buf.save();
        assert!(matches!(
            buf.read_bytes_with_length(),
            Err(Error::OutOfPackets)
        ));
        buf.restore(save);

        buf.push_segment(Bytes::from_static(&[0x00]));
        assert_eq!(buf.read_bytes_with_length().unwrap().unwrap(), b"abc");
    }

    #[test]
    fn skip_variants() {
        let mut buf = ReadBuffer::from_slice(&[0x02, 0xAA, 0xBB, 0x03, b'x', b'y', b'z', 0x42]);
        buf.skip_ub().unwrap();
        buf.skip_bytes_with_length().unwrap();
        assert_eq!(buf.read_u8().unwrap(), 0x42);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = ReadBuffer::from_slice(&[0x42, 0x43]);
        assert_eq!(buf.peek_u8().unwrap(), 0x42);
        assert_eq!(buf.read_u8().unwrap(), 0x42);
    }

    #[test]
    fn prefixed_int_sign() {
        let mut buf = ReadBuffer::from_slice(&[0x82, 0x01, 0x02, 0x02, 0x01, 0x02]);
        assert_eq!(buf.read_prefixed_int().unwrap(), -258);
        assert_eq!(buf.read_prefixed_int().unwrap(), 258);
    }
}
