//! TNS packet framing.
//!
//! Every packet starts with an 8-byte header. Protocol versions from 315 on
//! use a 4-byte length field; older versions use a 2-byte length followed by
//! a 2-byte checksum that is always zero on modern servers:
//!
//! ```text
//! legacy:  | len:u16 | chk:u16 | type:u8 | flags:u8 | hdr_chk:u16 |
//! modern:  | len:u32           | type:u8 | flags:u8 | hdr_chk:u16 |
//! ```
//!
//! The header length always counts the header itself.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{packet_flags, MarkerType, PacketType, PACKET_HEADER_SIZE};
use crate::error::{Error, Result};

/// Parsed TNS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length including the header
    pub length: u32,
    /// Packet type
    pub packet_type: PacketType,
    /// Flag bits
    pub flags: u8,
}

impl PacketHeader {
    /// Create a header for a packet of the given total length.
    pub fn new(packet_type: PacketType, length: u32) -> Self {
        Self {
            length,
            packet_type,
            flags: 0,
        }
    }

    /// Create a header with flags set.
    pub fn with_flags(packet_type: PacketType, length: u32, flags: u8) -> Self {
        Self {
            length,
            packet_type,
            flags,
        }
    }

    /// Parse the 8 header bytes. `large_sdu` selects the length encoding.
    pub fn parse(data: &[u8], large_sdu: bool) -> Result<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "packet header truncated: {} bytes",
                data.len()
            )));
        }
        let length = if large_sdu {
            u32::from_be_bytes([data[0], data[1], data[2], data[3]])
        } else {
            u16::from_be_bytes([data[0], data[1]]) as u32
        };
        let packet_type = PacketType::try_from(data[4])?;
        let flags = data[5];
        Ok(Self {
            length,
            packet_type,
            flags,
        })
    }

    /// Append the encoded header to `out`.
    pub fn encode_into(&self, out: &mut BytesMut, large_sdu: bool) {
        if large_sdu {
            out.put_u32(self.length);
        } else {
            out.put_u16(self.length as u16);
            out.put_u16(0); // checksum
        }
        out.put_u8(self.packet_type as u8);
        out.put_u8(self.flags);
        out.put_u16(0); // header checksum
    }

    /// Patch a previously reserved header in place at the start of `buf`.
    pub fn patch_into(&self, buf: &mut [u8], large_sdu: bool) {
        debug_assert!(buf.len() >= PACKET_HEADER_SIZE);
        if large_sdu {
            buf[..4].copy_from_slice(&self.length.to_be_bytes());
        } else {
            buf[..2].copy_from_slice(&(self.length as u16).to_be_bytes());
            buf[2] = 0;
            buf[3] = 0;
        }
        buf[4] = self.packet_type as u8;
        buf[5] = self.flags;
        buf[6] = 0;
        buf[7] = 0;
    }

    /// Bytes of payload following the header.
    pub fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Server requested a TLS renegotiation before proceeding.
    pub fn wants_tls_reneg(&self) -> bool {
        (self.flags & packet_flags::TLS_RENEG) != 0
    }
}

/// A complete packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The parsed header
    pub header: PacketHeader,
    /// Payload bytes after the header
    pub payload: Bytes,
}

impl Packet {
    /// Assemble a packet from parts.
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// The packet type.
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// True for DATA packets.
    pub fn is_data(&self) -> bool {
        self.header.packet_type == PacketType::Data
    }

    /// True for MARKER packets.
    pub fn is_marker(&self) -> bool {
        self.header.packet_type == PacketType::Marker
    }

    /// Decode the marker type of a MARKER packet.
    pub fn marker_type(&self) -> Option<MarkerType> {
        if !self.is_marker() || self.payload.len() < 3 {
            return None;
        }
        match self.payload[2] {
            1 => Some(MarkerType::Break),
            2 => Some(MarkerType::Reset),
            3 => Some(MarkerType::Interrupt),
            _ => None,
        }
    }

    /// The data flags of a DATA packet.
    pub fn data_flags(&self) -> u16 {
        if self.is_data() && self.payload.len() >= 2 {
            u16::from_be_bytes([self.payload[0], self.payload[1]])
        } else {
            0
        }
    }

    /// The TTC message body of a DATA packet (payload minus data flags).
    pub fn message_body(&self) -> Bytes {
        if self.is_data() && self.payload.len() >= 2 {
            self.payload.slice(2..)
        } else {
            self.payload.clone()
        }
    }
}

/// Build a MARKER packet carrying the given marker type.
pub fn build_marker(marker: MarkerType, large_sdu: bool) -> Bytes {
    let payload = [1u8, 0, marker as u8];
    let mut out = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
    let header = PacketHeader::new(
        PacketType::Marker,
        (PACKET_HEADER_SIZE + payload.len()) as u32,
    );
    header.encode_into(&mut out, large_sdu);
    out.put_slice(&payload);
    out.freeze()
}

/// Build a raw packet from a finished payload.
pub fn build_packet(
    packet_type: PacketType,
    flags: u8,
    payload: &[u8],
    large_sdu: bool,
) -> Bytes {
    let mut out = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
    let header = PacketHeader::with_flags(
        packet_type,
        (PACKET_HEADER_SIZE + payload.len()) as u32,
        flags,
    );
    header.encode_into(&mut out, large_sdu);
    out.put_slice(payload);
    out.freeze()
}
