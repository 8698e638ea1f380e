//! Packetizing request writer.
//!
//! A [`WriteBuffer`] batches typed writes into outbound packets bounded by
//! the negotiated SDU. `start_request` opens the first packet; typed writers
//! spill into a fresh DATA packet whenever the current one would overflow;
//! `end_request` finalizes the open packet and hands back the packet list
//! ready for the socket.
//!
//! Multi-byte scalar writes never straddle a packet boundary. Raw byte runs
//! are split across packets freely, which is what lets LOB payloads and long
//! bind values exceed a single SDU.

use bytes::{BufMut, Bytes, BytesMut};

use crate::caps::Capabilities;
use crate::constants::{length, MessageType, PacketType, PACKET_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::packet::PacketHeader;

/// SDU-bounded packet writer.
#[derive(Debug)]
pub struct WriteBuffer {
    sdu: usize,
    large_sdu: bool,
    packet_type: PacketType,
    packet_flags: u8,
    current: BytesMut,
    finished: Vec<Bytes>,
    in_request: bool,
}

impl WriteBuffer {
    /// Create a writer for the given SDU and header encoding.
    pub fn new(sdu: u32, large_sdu: bool) -> Self {
        Self {
            sdu: sdu.max(512) as usize,
            large_sdu,
            packet_type: PacketType::Data,
            packet_flags: 0,
            current: BytesMut::new(),
            finished: Vec::new(),
            in_request: false,
        }
    }

    /// Begin a request packet. DATA packets get the two data-flag bytes
    /// reserved right after the header.
    pub fn start_request(&mut self, packet_type: PacketType, packet_flags: u8) {
        debug_assert!(!self.in_request, "request already open");
        self.packet_type = packet_type;
        self.packet_flags = packet_flags;
        self.in_request = true;
        self.open_packet();
    }

    fn open_packet(&mut self) {
        self.current = BytesMut::with_capacity(self.sdu);
        self.current.resize(PACKET_HEADER_SIZE, 0);
        if self.packet_type == PacketType::Data {
            self.current.put_u16(0); // data flags
        }
    }

    fn seal_packet(&mut self) {
        let header = PacketHeader::with_flags(
            self.packet_type,
            self.current.len() as u32,
            self.packet_flags,
        );
        header.patch_into(&mut self.current, self.large_sdu);
        let done = std::mem::take(&mut self.current);
        self.finished.push(done.freeze());
    }

    /// Close the open packet. When the capabilities carry explicit request
    /// boundaries, an end-of-request message byte is appended first. Returns
    /// every packet of the request in send order.
    pub fn end_request(&mut self, caps: &Capabilities) -> Result<Vec<Bytes>> {
        debug_assert!(self.in_request, "no request open");
        if caps.supports_end_of_request && self.packet_type == PacketType::Data {
            self.write_u8(MessageType::EndOfRequest as u8)?;
        }
        self.seal_packet();
        self.in_request = false;
        Ok(std::mem::take(&mut self.finished))
    }

    /// Close the open packet without the end-of-request marker.
    pub fn end_request_raw(&mut self) -> Vec<Bytes> {
        debug_assert!(self.in_request, "no request open");
        self.seal_packet();
        self.in_request = false;
        std::mem::take(&mut self.finished)
    }

    /// Set the data flags of the packet currently being built.
    pub fn set_data_flags(&mut self, flags: u16) {
        debug_assert_eq!(self.packet_type, PacketType::Data);
        self.current[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + 2]
            .copy_from_slice(&flags.to_be_bytes());
    }

    /// Bytes of payload room left in the current packet.
    fn room(&self) -> usize {
        self.sdu.saturating_sub(self.current.len())
    }

    /// Make sure `n` contiguous bytes fit in the current packet, spilling
    /// into a new one if needed. Only valid for runs smaller than the SDU.
    fn reserve_contiguous(&mut self, n: usize) -> Result<()> {
        if !self.in_request {
            return Err(Error::Internal("write outside of request".into()));
        }
        if self.room() < n {
            if self.packet_type != PacketType::Data {
                return Err(Error::Protocol(format!(
                    "{:?} packet overflow: {} bytes do not fit",
                    self.packet_type, n
                )));
            }
            self.seal_packet();
            self.open_packet();
        }
        Ok(())
    }

    // =========================================================================
    // Primitive writes
    // =========================================================================

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.reserve_contiguous(1)?;
        self.current.put_u8(value);
        Ok(())
    }

    /// Write a big-endian u16.
    pub fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.reserve_contiguous(2)?;
        self.current.put_u16(value);
        Ok(())
    }

    /// Write a big-endian u32.
    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.reserve_contiguous(4)?;
        self.current.put_u32(value);
        Ok(())
    }

    /// Write a big-endian u64.
    pub fn write_u64_be(&mut self, value: u64) -> Result<()> {
        self.reserve_contiguous(8)?;
        self.current.put_u64(value);
        Ok(())
    }

    /// Write `n` zero bytes.
    pub fn write_zeros(&mut self, n: usize) -> Result<()> {
        self.write_bytes(&vec![0u8; n])
    }

    /// Write a raw byte run, splitting across packets as needed.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if !self.in_request {
            return Err(Error::Internal("write outside of request".into()));
        }
        while !data.is_empty() {
            if self.room() == 0 {
                if self.packet_type != PacketType::Data {
                    return Err(Error::Protocol(format!(
                        "{:?} packet overflow",
                        self.packet_type
                    )));
                }
                self.seal_packet();
                self.open_packet();
            }
            let step = self.room().min(data.len());
            self.current.put_slice(&data[..step]);
            data = &data[step..];
        }
        Ok(())
    }

    // =========================================================================
    // Length-prefixed integers (UB family)
    // =========================================================================

    /// Write a length-prefixed u16.
    pub fn write_ub2(&mut self, value: u16) -> Result<()> {
        self.write_ub8(value as u64)
    }

    /// Write a length-prefixed u32.
    pub fn write_ub4(&mut self, value: u32) -> Result<()> {
        self.write_ub8(value as u64)
    }

    /// Write a length-prefixed u64 using the smallest of the 0/1/2/4/8-byte
    /// magnitude forms.
    pub fn write_ub8(&mut self, value: u64) -> Result<()> {
        match value {
            0 => self.write_u8(0),
            1..=0xFF => {
                self.reserve_contiguous(2)?;
                self.current.put_u8(1);
                self.current.put_u8(value as u8);
                Ok(())
            }
            0x100..=0xFFFF => {
                self.reserve_contiguous(3)?;
                self.current.put_u8(2);
                self.current.put_u16(value as u16);
                Ok(())
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.reserve_contiguous(5)?;
                self.current.put_u8(4);
                self.current.put_u32(value as u32);
                Ok(())
            }
            _ => {
                self.reserve_contiguous(9)?;
                self.current.put_u8(8);
                self.current.put_u64(value);
                Ok(())
            }
        }
    }

    /// Write a signed integer in length-plus-magnitude form; the sign rides
    /// on the high bit of the length byte.
    pub fn write_prefixed_int(&mut self, value: i64) -> Result<()> {
        if value == 0 {
            return self.write_u8(0);
        }
        let (magnitude, negative) = if value < 0 {
            (value.unsigned_abs(), true)
        } else {
            (value as u64, false)
        };
        let len = ((64 - magnitude.leading_zeros() + 7) / 8) as u8;
        self.reserve_contiguous(1 + len as usize)?;
        self.current
            .put_u8(if negative { len | 0x80 } else { len });
        for i in (0..len).rev() {
            self.current.put_u8((magnitude >> (i * 8)) as u8);
        }
        Ok(())
    }

    // =========================================================================
    // Length-prefixed values
    // =========================================================================

    /// Write a length-prefixed byte value: `0xFF` for NULL, a single length
    /// byte for values up to 252 bytes, chunked form beyond that.
    pub fn write_bytes_with_length(&mut self, value: Option<&[u8]>) -> Result<()> {
        match value {
            None => self.write_u8(length::NULL),
            Some(data) if data.is_empty() => self.write_u8(0),
            Some(data) if data.len() <= length::MAX_SHORT as usize => {
                self.write_u8(data.len() as u8)?;
                self.write_bytes(data)
            }
            Some(data) => {
                self.write_u8(length::LONG_FORM)?;
                for chunk in data.chunks(length::CHUNK_SIZE) {
                    self.write_ub4(chunk.len() as u32)?;
                    self.write_bytes(chunk)?;
                }
                self.write_ub4(0)
            }
        }
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str_with_length(&mut self, value: Option<&str>) -> Result<()> {
        self.write_bytes_with_length(value.map(str::as_bytes))
    }

    /// Write a key/value pair in the auth list format: ub4 key length,
    /// prefixed key, ub4 value length, prefixed value, ub4 flags.
    pub fn write_keyword_pair(&mut self, key: &str, value: &str, flags: u32) -> Result<()> {
        self.write_ub4(key.len() as u32)?;
        self.write_bytes_with_length(Some(key.as_bytes()))?;
        self.write_ub4(value.len() as u32)?;
        if !value.is_empty() {
            self.write_bytes_with_length(Some(value.as_bytes()))?;
        }
        self.write_ub4(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadBuffer;

    fn finish(buf: &mut WriteBuffer) -> Vec<Bytes> {
        buf.end_request_raw()
    }

    fn data_body(packet: &Bytes) -> &[u8] {
        &packet[PACKET_HEADER_SIZE + 2..]
    }

    #[test]
    fn single_packet_request() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_u8(0x03).unwrap();
        buf.write_u16_be(0x0102).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(packets.len(), 1);

        let header = PacketHeader::parse(&packets[0], true).unwrap();
        assert_eq!(header.packet_type, PacketType::Data);
        assert_eq!(header.length as usize, packets[0].len());
        assert_eq!(data_body(&packets[0]), &[0x03, 0x01, 0x02]);
    }

    #[test]
    fn spills_into_second_packet_at_sdu() {
        let mut buf = WriteBuffer::new(512, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_bytes(&vec![0xAA; 900]).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(packets.len(), 2);
        for p in &packets {
            assert!(p.len() <= 512);
            let header = PacketHeader::parse(p, true).unwrap();
            assert_eq!(header.length as usize, p.len());
        }
        let total: usize = packets
            .iter()
            .map(|p| p.len() - PACKET_HEADER_SIZE - 2)
            .sum();
        assert_eq!(total, 900);
    }

    #[test]
    fn scalars_do_not_straddle_packets() {
        let mut buf = WriteBuffer::new(512, true);
        buf.start_request(PacketType::Data, 0);
        // Leave exactly 3 bytes of room, then write a u32.
        buf.write_bytes(&vec![0u8; 512 - PACKET_HEADER_SIZE - 2 - 3])
            .unwrap();
        buf.write_u32_be(0xDEADBEEF).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(packets.len(), 2);
        assert_eq!(data_body(&packets[1]), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn ub_round_trips() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        for v in [0u64, 1, 0x42, 0xFF, 0x100, 0xFFFF, 0x10000, 0xFFFF_FFFF, u64::MAX] {
            buf.write_ub8(v).unwrap();
        }
        let packets = finish(&mut buf);
        let mut rd = ReadBuffer::from_slice(data_body(&packets[0]));
        for v in [0u64, 1, 0x42, 0xFF, 0x100, 0xFFFF, 0x10000, 0xFFFF_FFFF, u64::MAX] {
            assert_eq!(rd.read_ub8().unwrap(), v);
        }
    }

    #[test]
    fn length_threshold_is_252() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_bytes_with_length(Some(&vec![0xAA; 252])).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(data_body(&packets[0])[0], 252);

        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_bytes_with_length(Some(&vec![0xAA; 253])).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(data_body(&packets[0])[0], length::LONG_FORM);
    }

    #[test]
    fn chunked_value_round_trips() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_bytes_with_length(Some(&data)).unwrap();
        let packets = finish(&mut buf);

        let mut rd = ReadBuffer::new();
        for p in &packets {
            rd.push_segment(p.slice(PACKET_HEADER_SIZE + 2..));
        }
        assert_eq!(rd.read_bytes_with_length().unwrap().unwrap(), data);
    }

    #[test]
    fn null_and_empty_values() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_bytes_with_length(None).unwrap();
        buf.write_bytes_with_length(Some(&[])).unwrap();
        let packets = finish(&mut buf);
        assert_eq!(data_body(&packets[0]), &[0xFF, 0x00]);
    }

    #[test]
    fn prefixed_int_round_trips() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        for v in [0i64, 258, -258, i64::MAX, i64::MIN + 1] {
            buf.write_prefixed_int(v).unwrap();
        }
        let packets = finish(&mut buf);
        let mut rd = ReadBuffer::from_slice(data_body(&packets[0]));
        for v in [0i64, 258, -258, i64::MAX, i64::MIN + 1] {
            assert_eq!(rd.read_prefixed_int().unwrap(), v);
        }
    }

    #[test]
    fn end_of_request_marker_appended() {
        let mut caps = Capabilities::new();
        caps.supports_end_of_request = true;
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_u8(0x03).unwrap();
        let packets = buf.end_request(&caps).unwrap();
        let body = data_body(&packets[0]);
        assert_eq!(body[body.len() - 1], MessageType::EndOfRequest as u8);
    }

    #[test]
    fn connect_packet_has_no_data_flags() {
        let mut buf = WriteBuffer::new(8192, false);
        buf.start_request(PacketType::Connect, 0);
        buf.write_u16_be(0x013F).unwrap();
        let packets = finish(&mut buf);
        // Payload begins immediately after the 8-byte header.
        assert_eq!(&packets[0][PACKET_HEADER_SIZE..], &[0x01, 0x3F]);
    }
}
