//! Protocol negotiation message (TTC type 1).
//!
//! The client sends its supported protocol generation and driver name; the
//! server answers with its banner, character sets, and the compile/runtime
//! capability vectors. The charset id and element count in the response are
//! little-endian on the wire; everything else in this driver is big-endian.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::{Capabilities, DRIVER_NAME};
use crate::constants::MessageType;
use crate::error::{Error, Result};

use super::{MessageState, TtcMessage};

/// Protocol exchange codec. Results are applied to the capabilities by the
/// engine once the round trip completes.
#[derive(Debug, Default)]
pub struct ProtocolExchange {
    state: MessageState,
    /// Server protocol generation byte
    pub server_version: u8,
    /// Server flags byte
    pub server_flags: u8,
    /// Server version banner
    pub server_banner: String,
    /// Database charset id from the response
    pub charset_id: u16,
    /// National charset id extracted from the FDO block
    pub ncharset_id: u16,
    /// Server compile-time capability vector
    pub server_compile_caps: Vec<u8>,
    /// Server runtime capability vector
    pub server_runtime_caps: Vec<u8>,
}

impl ProtocolExchange {
    /// A fresh exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the response into the connection capabilities.
    pub fn apply(&self, caps: &mut Capabilities) {
        if self.charset_id != 0 {
            caps.charset_id = self.charset_id;
        }
        if self.ncharset_id != 0 {
            caps.ncharset_id = self.ncharset_id;
        }
        caps.apply_server_compile_caps(&self.server_compile_caps);
        caps.apply_server_runtime_caps(&self.server_runtime_caps);
    }
}

impl TtcMessage for ProtocolExchange {
    fn write(&mut self, buf: &mut WriteBuffer, _caps: &Capabilities) -> Result<()> {
        buf.write_u8(MessageType::Protocol as u8)?;
        buf.write_u8(6)?; // protocol generation: 8.1 and later
        buf.write_u8(0)?; // array terminator
        buf.write_bytes(DRIVER_NAME.as_bytes())?;
        buf.write_u8(0)?;
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()> {
        if message_type != MessageType::Protocol {
            return Err(Error::Protocol(format!(
                "unexpected message {message_type:?} during protocol negotiation"
            )));
        }

        self.server_version = buf.read_u8()?;
        buf.skip(1)?;

        let mut banner = Vec::new();
        loop {
            let b = buf.read_u8()?;
            if b == 0 {
                break;
            }
            banner.push(b);
        }
        self.server_banner = String::from_utf8_lossy(&banner).into_owned();

        // Charset id and element count arrive little-endian.
        let cs_lo = buf.read_u8()? as u16;
        let cs_hi = buf.read_u8()? as u16;
        self.charset_id = cs_lo | (cs_hi << 8);

        self.server_flags = buf.read_u8()?;

        let elem_lo = buf.read_u8()? as usize;
        let elem_hi = buf.read_u8()? as usize;
        let num_elements = elem_lo | (elem_hi << 8);
        if num_elements > 0 {
            buf.skip(num_elements * 5)?;
        }

        // FDO block; the national charset hides at a derived offset.
        let fdo_len = buf.read_u16_be()? as usize;
        if fdo_len > 0 {
            let fdo = buf.read_bytes(fdo_len)?;
            if fdo.len() > 6 {
                let offset = 6 + fdo[5] as usize + fdo[6] as usize;
                if offset + 5 <= fdo.len() {
                    self.ncharset_id =
                        ((fdo[offset + 3] as u16) << 8) | fdo[offset + 4] as u16;
                }
            }
        }

        self.server_compile_caps = buf.read_bytes_with_length()?.unwrap_or_default();
        self.server_runtime_caps = buf.read_bytes_with_length()?.unwrap_or_default();

        // Pre-boundary servers send nothing after the capability vectors;
        // with explicit boundaries the end-of-request message follows.
        if !caps.supports_end_of_request {
            self.state.end_of_response = true;
        }
        Ok(())
    }

    fn state(&mut self) -> &mut MessageState {
        &mut self.state
    }

    fn state_ref(&self) -> &MessageState {
        &self.state
    }
}
