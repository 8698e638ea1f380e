//! Phase-one packets: CONNECT and the ACCEPT / REFUSE / REDIRECT replies.
//!
//! The CONNECT packet is a fixed 74-byte preamble followed by the connect
//! descriptor. Descriptors longer than 230 bytes ride in a follow-up DATA
//! packet instead. The server answers with ACCEPT (negotiation results),
//! REFUSE (listener error), REDIRECT (connect elsewhere), or RESEND.

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::ReadBuffer;
use crate::config::{sanitize_cid_value, Description};
use crate::constants::{
    accept_flags, connect, nsi_flags, packet_flags, service_options, version, PacketType,
    PACKET_HEADER_SIZE,
};
use crate::error::{Error, Result, ServerError};
use crate::packet::{Packet, PacketHeader};

/// Builder for the phase-one CONNECT packet.
#[derive(Debug)]
pub struct ConnectRequest {
    /// Rendered connect descriptor
    pub connect_string: String,
    /// Requested SDU
    pub sdu: u32,
    /// Requested TDU
    pub tdu: u32,
    /// Set on the replayed CONNECT after a REDIRECT
    pub is_redirect: bool,
    /// Ask the server for the OOB probe
    pub enable_oob: bool,
}

impl ConnectRequest {
    /// Build the request for a description, embedding the sanitized client
    /// identity in the descriptor's CID section.
    pub fn new(description: &Description, program: &str, enable_oob: bool) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".into());
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".into());
        let cid = format!(
            "(CID=(PROGRAM={})(HOST={})(USER={}))",
            sanitize_cid_value(program),
            sanitize_cid_value(&host),
            sanitize_cid_value(&user),
        );
        Self {
            connect_string: description.render_connect_string(&cid),
            sdu: description.sdu,
            tdu: connect::DEFAULT_TDU,
            is_redirect: false,
            enable_oob,
        }
    }

    /// Serialize into the CONNECT packet and, for long descriptors, the
    /// follow-up DATA packet.
    pub fn build(&self) -> Result<(Bytes, Option<Bytes>)> {
        let data = self.connect_string.as_bytes();
        let inline = data.len() <= connect::MAX_INLINE_CONNECT_DATA;

        let mut payload = BytesMut::with_capacity(66 + data.len());
        payload.put_u16(version::DESIRED);
        payload.put_u16(version::MINIMUM);
        let mut opts = service_options::DONT_CARE;
        if self.enable_oob {
            opts |= service_options::CAN_RECV_ATTENTION;
        }
        payload.put_u16(opts);
        payload.put_u16(self.sdu.min(0xFFFF) as u16);
        payload.put_u16(self.tdu.min(0xFFFF) as u16);
        payload.put_u16(connect::PROTOCOL_CHARACTERISTICS);
        payload.put_u16(0); // line turnaround
        payload.put_u16(1); // host byte order marker
        payload.put_u16(data.len() as u16);
        payload.put_u16(connect::CONNECT_DATA_OFFSET);
        payload.put_u32(0); // maximum receivable data
        let nsi = nsi_flags::SUPPORT_SECURITY_RENEG | nsi_flags::DISABLE_NA;
        payload.put_u8(nsi);
        payload.put_u8(nsi);
        payload.put_bytes(0, 24); // obsolete fields
        payload.put_u32(self.sdu);
        payload.put_u32(self.tdu);
        payload.put_u32(0); // connect flags 1
        payload.put_u32(if self.enable_oob {
            connect::CHECK_OOB_FLAG
        } else {
            0
        });
        if inline {
            payload.put_slice(data);
        }

        let flags = if self.is_redirect {
            packet_flags::REDIRECT
        } else {
            0
        };
        // Phase one always uses the legacy header encoding.
        let connect_packet =
            crate::packet::build_packet(PacketType::Connect, flags, &payload, false);

        let continuation = if inline {
            None
        } else {
            let mut body = BytesMut::with_capacity(2 + data.len());
            body.put_u16(0); // data flags
            body.put_slice(data);
            Some(crate::packet::build_packet(
                PacketType::Data,
                0,
                &body,
                false,
            ))
        };

        Ok((connect_packet, continuation))
    }
}

/// Parsed ACCEPT packet.
#[derive(Debug, Clone)]
pub struct AcceptInfo {
    /// Negotiated protocol version
    pub protocol_version: u16,
    /// Service options echoed back
    pub service_options: u16,
    /// Negotiated SDU
    pub sdu: u32,
    /// Hardware byte order field, recorded verbatim
    pub hardware_byte_order: u16,
    /// Extended flags (version >= 318)
    pub flags2: u32,
    /// Server wants a TLS renegotiation before phase two
    pub wants_tls_reneg: bool,
}

impl AcceptInfo {
    /// Parse an ACCEPT packet.
    pub fn parse(packet: &Packet) -> Result<Self> {
        debug_assert_eq!(packet.packet_type(), PacketType::Accept);
        let mut buf = ReadBuffer::from_bytes(packet.payload.clone());

        let protocol_version = buf.read_u16_be()?;
        if protocol_version < version::MIN_ACCEPTED {
            return Err(Error::UnsupportedProtocolVersion {
                got: protocol_version,
                minimum: version::MIN_ACCEPTED,
            });
        }

        let service_options = buf.read_u16_be()?;
        let sdu16 = buf.read_u16_be()? as u32;
        let _tdu16 = buf.read_u16_be()?;
        let hardware_byte_order = buf.read_u16_be()?;
        let _data_length = buf.read_u16_be()?;
        let _data_offset = buf.read_u16_be()?;
        let flags0 = buf.read_u8()?;
        let _flags1 = buf.read_u8()?;

        if flags0 & nsi_flags::NA_REQUIRED != 0 {
            return Err(Error::NativeEncryptionRequired);
        }

        buf.skip(8)?; // reserved

        let sdu = if protocol_version >= version::MIN_LARGE_SDU {
            buf.read_u32_be()?
        } else {
            sdu16
        };

        let flags2 = if protocol_version >= version::MIN_OOB_CHECK {
            buf.skip(5)?;
            buf.read_u32_be()?
        } else {
            0
        };

        Ok(Self {
            protocol_version,
            service_options,
            sdu,
            hardware_byte_order,
            flags2,
            wants_tls_reneg: packet.header.wants_tls_reneg(),
        })
    }

    /// The server can receive the urgent attention byte.
    pub fn supports_oob(&self) -> bool {
        self.service_options & service_options::CAN_RECV_ATTENTION != 0
            && self.flags2 & accept_flags::CHECK_OOB != 0
    }

    /// Packet headers switch to the 4-byte length form.
    pub fn uses_large_sdu(&self) -> bool {
        self.protocol_version >= version::MIN_LARGE_SDU
    }
}

/// Parsed REFUSE packet.
#[derive(Debug, Clone)]
pub struct RefuseInfo {
    /// User-level refusal reason byte
    pub user_reason: u8,
    /// System-level refusal reason byte
    pub system_reason: u8,
    /// ORA error carried in the refusal data, when present
    pub error: Option<ServerError>,
}

impl RefuseInfo {
    /// Parse a REFUSE packet.
    pub fn parse(packet: &Packet) -> Result<Self> {
        debug_assert_eq!(packet.packet_type(), PacketType::Refuse);
        let mut buf = ReadBuffer::from_bytes(packet.payload.clone());
        let user_reason = buf.read_u8()?;
        let system_reason = buf.read_u8()?;
        let data_len = buf.read_u16_be()? as usize;
        let error = if data_len > 0 {
            let raw = buf.read_bytes(data_len.min(packet.payload.len().saturating_sub(4)))?;
            let text = String::from_utf8_lossy(&raw);
            parse_refuse_error(&text)
        } else {
            None
        };
        Ok(Self {
            user_reason,
            system_reason,
            error,
        })
    }

    /// Convert into the crate error.
    pub fn into_error(self) -> Error {
        Error::Refused(self.error)
    }
}

/// Pull `(ERR=12514)` style fields out of the refusal descriptor.
fn parse_refuse_error(text: &str) -> Option<ServerError> {
    let start = text.find("(ERR=")? + 5;
    let end = text[start..].find(')')? + start;
    let code: u32 = text[start..end].parse().ok()?;
    Some(ServerError::new(code, refuse_message_for(code)))
}

fn refuse_message_for(code: u32) -> String {
    match code {
        crate::constants::ora::INVALID_SERVICE_NAME => {
            "listener does not currently know of service requested".into()
        }
        crate::constants::ora::INVALID_SID => {
            "listener does not currently know of SID given".into()
        }
        _ => format!("listener refused connection (error {code})"),
    }
}

/// Parsed REDIRECT packet.
#[derive(Debug, Clone)]
pub struct RedirectInfo {
    /// Host to reconnect to
    pub host: String,
    /// Port to reconnect to
    pub port: u16,
    /// Raw redirect descriptor for diagnostics
    pub raw: String,
}

impl RedirectInfo {
    /// Parse a REDIRECT packet. The payload is a u16 length followed by
    /// `new_connect_data` optionally NUL-separated from the original
    /// connect string.
    pub fn parse(packet: &Packet) -> Result<Self> {
        debug_assert_eq!(packet.packet_type(), PacketType::Redirect);
        if packet.payload.len() < 2 {
            return Err(Error::Protocol("empty REDIRECT payload".into()));
        }
        let data_len =
            u16::from_be_bytes([packet.payload[0], packet.payload[1]]) as usize;
        let data = &packet.payload[2..];
        let data = &data[..data_len.min(data.len())];
        let text = String::from_utf8_lossy(data);
        let new_part = text.split('\0').next().unwrap_or("");

        let host = extract_field(new_part, "HOST")
            .ok_or_else(|| Error::Protocol(format!("REDIRECT without HOST: {text}")))?;
        let port = extract_field(new_part, "PORT")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| Error::Protocol(format!("REDIRECT without PORT: {text}")))?;

        Ok(Self {
            host,
            port,
            raw: new_part.to_string(),
        })
    }
}

fn extract_field(descriptor: &str, key: &str) -> Option<String> {
    let upper = descriptor.to_ascii_uppercase();
    let tag = format!("({key}=");
    let start = upper.find(&tag)? + tag.len();
    let end = upper[start..].find(')')? + start;
    Some(descriptor[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Description;

    fn description() -> Description {
        "dbhost:1521/SALES".parse().unwrap()
    }

    #[test]
    fn connect_packet_shape() {
        let request = ConnectRequest::new(&description(), "app", true);
        let (packet, continuation) = request.build().unwrap();
        assert!(continuation.is_none());
        assert_eq!(packet[4], PacketType::Connect as u8);

        // Version fields right after the header.
        let desired = u16::from_be_bytes([packet[8], packet[9]]);
        let minimum = u16::from_be_bytes([packet[10], packet[11]]);
        assert_eq!(desired, version::DESIRED);
        assert_eq!(minimum, version::MINIMUM);

        // Descriptor is carried inline at the fixed offset.
        let text = String::from_utf8_lossy(&packet[PACKET_HEADER_SIZE + 66..]);
        assert!(text.contains("(SERVICE_NAME=SALES)"));
        assert!(text.contains("(HOST=dbhost)"));
        assert!(text.contains("(PROGRAM=app)"));
    }

    #[test]
    fn long_descriptor_splits_into_data_packet() {
        let mut desc = description();
        let long_name = "S".repeat(300);
        desc.service = crate::config::ServiceTarget::ServiceName(long_name.clone());
        let request = ConnectRequest::new(&desc, "app", false);
        let (packet, continuation) = request.build().unwrap();

        let data = continuation.expect("continuation packet");
        assert_eq!(packet[4], PacketType::Connect as u8);
        assert_eq!(data[4], PacketType::Data as u8);
        assert!(String::from_utf8_lossy(&data).contains(&long_name));
        // The CONNECT packet itself carries no descriptor.
        assert_eq!(packet.len(), PACKET_HEADER_SIZE + 66);
    }

    #[test]
    fn redirect_flag_set_on_replay() {
        let mut request = ConnectRequest::new(&description(), "app", false);
        request.is_redirect = true;
        let (packet, _) = request.build().unwrap();
        assert_eq!(packet[5] & packet_flags::REDIRECT, packet_flags::REDIRECT);
    }

    #[test]
    fn cid_sanitized() {
        let request = ConnectRequest::new(&description(), "evil(PROGRAM=x)", false);
        assert!(!request.connect_string.contains("evil(PROGRAM"));
        assert!(request.connect_string.contains("evil?PROGRAM?x?"));
    }

    fn make_packet(ty: PacketType, payload: &[u8]) -> Packet {
        let header = PacketHeader::new(ty, (PACKET_HEADER_SIZE + payload.len()) as u32);
        Packet::new(header, Bytes::copy_from_slice(payload))
    }

    #[test]
    fn accept_parses_modern_server() {
        let payload = [
            0x01, 0x3F, // version 319
            0x04, 0x01, // service options incl. CAN_RECV_ATTENTION
            0x20, 0x00, // sdu16
            0xFF, 0xFF, // tdu16
            0x00, 0x01, // hardware byte order
            0x00, 0x00, // data length
            0x00, 0x00, // data offset
            0x04, 0x04, // flags
            0, 0, 0, 0, 0, 0, 0, 0, // reserved
            0x00, 0x00, 0x80, 0x00, // sdu32 = 32768
            0, 0, 0, 0, 0, // reserved
            0x10, 0x00, 0x00, 0x01, // flags2: FAST_AUTH | CHECK_OOB
        ];
        let accept = AcceptInfo::parse(&make_packet(PacketType::Accept, &payload)).unwrap();
        assert_eq!(accept.protocol_version, 319);
        assert_eq!(accept.sdu, 32768);
        assert!(accept.uses_large_sdu());
        assert!(accept.supports_oob());
        assert_eq!(accept.hardware_byte_order, 1);
    }

    #[test]
    fn accept_rejects_old_protocol() {
        let payload = [
            0x01, 0x2C, // version 300
            0x00, 0x00, 0x20, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            AcceptInfo::parse(&make_packet(PacketType::Accept, &payload)),
            Err(Error::UnsupportedProtocolVersion { got: 300, .. })
        ));
    }

    #[test]
    fn accept_rejects_mandatory_encryption() {
        let payload = [
            0x01, 0x3F, 0x00, 0x00, 0x20, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            nsi_flags::NA_REQUIRED,
            0x00,
        ];
        assert!(matches!(
            AcceptInfo::parse(&make_packet(PacketType::Accept, &payload)),
            Err(Error::NativeEncryptionRequired)
        ));
    }

    #[test]
    fn refuse_extracts_listener_error() {
        let text = b"(DESCRIPTION=(ERR=12514)(VSNNUM=419430400))";
        let mut payload = vec![1, 2];
        payload.extend_from_slice(&(text.len() as u16).to_be_bytes());
        payload.extend_from_slice(text);
        let refuse = RefuseInfo::parse(&make_packet(PacketType::Refuse, &payload)).unwrap();
        let error = refuse.error.expect("error code");
        assert_eq!(error.code, 12514);
    }

    #[test]
    fn redirect_parses_target() {
        let text = b"(DESCRIPTION=(ADDRESS=(HOST=h2)(PORT=1599))(CONNECT_DATA=(SERVICE_NAME=S)))\0(original)";
        let mut payload = Vec::new();
        payload.extend_from_slice(&(text.len() as u16).to_be_bytes());
        payload.extend_from_slice(text);
        let redirect =
            RedirectInfo::parse(&make_packet(PacketType::Redirect, &payload)).unwrap();
        assert_eq!(redirect.host, "h2");
        assert_eq!(redirect.port, 1599);
    }

    #[test]
    fn redirect_without_host_is_protocol_error() {
        let text = b"(DESCRIPTION=(NOTHING=1))";
        let mut payload = Vec::new();
        payload.extend_from_slice(&(text.len() as u16).to_be_bytes());
        payload.extend_from_slice(text);
        assert!(RedirectInfo::parse(&make_packet(PacketType::Redirect, &payload)).is_err());
    }
}
