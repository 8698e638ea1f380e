//! LOB operation message (function code 96).
//!
//! A single opcode-discriminated call covers every locator operation:
//! read, write, trim, length, chunk size, open/close, temporary create and
//! free, and the BFILE file checks. Reads return LOB data messages plus an
//! updated amount; several operations return a refreshed locator in a
//! parameter block.

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{charset, lob_locator, lob_op, FunctionCode, MessageType, OraType};
use crate::error::{Error, Result};

use super::{write_function_header, MessageState, TtcMessage};

/// What a LOB round trip produced.
#[derive(Debug, Default)]
pub struct LobOutcome {
    /// Raw data returned by a read
    pub data: Vec<u8>,
    /// Amount field from the response (length, read size, or boolean)
    pub amount: u64,
    /// Updated locator bytes, when the server sent them back
    pub updated_locator: Option<Bytes>,
}

/// The LOB call codec.
#[derive(Debug)]
pub struct LobCall {
    state: MessageState,
    operation: u32,
    locator: Vec<u8>,
    source_offset: u64,
    dest_offset: u64,
    amount: u64,
    send_amount: bool,
    dest_length: u32,
    write_data: Option<Vec<u8>>,
    sequence: u8,
    /// Results of the round trip
    pub outcome: LobOutcome,
}

impl LobCall {
    fn base(operation: u32, locator: Vec<u8>, sequence: u8) -> Self {
        Self {
            state: MessageState::default(),
            operation,
            locator,
            source_offset: 0,
            dest_offset: 0,
            amount: 0,
            send_amount: false,
            dest_length: 0,
            write_data: None,
            sequence,
            outcome: LobOutcome::default(),
        }
    }

    /// Read `amount` units starting at the 1-based `offset`.
    pub fn read(locator: Vec<u8>, offset: u64, amount: u64, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::READ, locator, sequence);
        call.source_offset = offset;
        call.amount = amount;
        call.send_amount = true;
        call
    }

    /// Write `data` starting at the 1-based `offset`.
    pub fn write(locator: Vec<u8>, offset: u64, data: Vec<u8>, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::WRITE, locator, sequence);
        call.source_offset = offset;
        call.write_data = Some(data);
        call
    }

    /// Query the LOB length.
    pub fn length(locator: Vec<u8>, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::GET_LENGTH, locator, sequence);
        call.send_amount = true;
        call
    }

    /// Query the ideal IO chunk size.
    pub fn chunk_size(locator: Vec<u8>, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::GET_CHUNK_SIZE, locator, sequence);
        call.send_amount = true;
        call
    }

    /// Truncate to `new_length`.
    pub fn trim(locator: Vec<u8>, new_length: u64, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::TRIM, locator, sequence);
        call.amount = new_length;
        call.send_amount = true;
        call
    }

    /// Open the LOB for a sequence of operations.
    pub fn open(locator: Vec<u8>, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::OPEN, locator, sequence);
        call.amount = 2; // read/write mode
        call.send_amount = true;
        call
    }

    /// Close an opened LOB.
    pub fn close(locator: Vec<u8>, sequence: u8) -> Self {
        Self::base(lob_op::CLOSE, locator, sequence)
    }

    /// Create a session-duration temporary LOB of the given type. The
    /// server fills in the locator.
    pub fn create_temp(ora_type: OraType, sequence: u8) -> Self {
        let mut call = Self::base(
            lob_op::CREATE_TEMP,
            vec![0u8; 40],
            sequence,
        );
        call.dest_length = lob_locator::DURATION_SESSION as u32;
        call.source_offset = crate::types::lob::default_charset_form(ora_type) as u64;
        call.dest_offset = ora_type as u64;
        call.send_amount = true;
        call.amount = lob_locator::DURATION_SESSION;
        call
    }

    /// Free a temporary LOB.
    pub fn free_temp(locator: Vec<u8>, sequence: u8) -> Self {
        Self::base(lob_op::FREE_TEMP, locator, sequence)
    }

    /// Does the BFILE exist on the server filesystem?
    pub fn file_exists(locator: Vec<u8>, sequence: u8) -> Self {
        let mut call = Self::base(lob_op::FILE_EXISTS, locator, sequence);
        call.send_amount = true;
        call
    }

    fn wants_null_locator(&self) -> bool {
        matches!(
            self.operation,
            lob_op::FILE_EXISTS | lob_op::FILE_ISOPEN | lob_op::CREATE_TEMP | lob_op::IS_OPEN
        )
    }
}

impl TtcMessage for LobCall {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::LobOp, self.sequence, caps)?;

        let is_create_temp = self.operation == lob_op::CREATE_TEMP;

        if self.locator.is_empty() {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
        } else {
            buf.write_u8(1)?;
            buf.write_ub4(self.locator.len() as u32)?;
        }
        buf.write_u8(0)?; // destination locator pointer
        buf.write_ub4(self.dest_length)?;
        buf.write_ub4(0)?; // short source offset
        buf.write_ub4(0)?; // short destination offset
        buf.write_u8(is_create_temp as u8)?; // charset pointer
        buf.write_u8(0)?; // short amount pointer
        buf.write_u8(self.wants_null_locator() as u8)?;
        buf.write_ub4(self.operation)?;
        buf.write_u8(0)?; // SCN pointer
        buf.write_u8(0)?; // SCN array length
        buf.write_ub8(self.source_offset)?;
        buf.write_ub8(self.dest_offset)?;
        buf.write_u8(self.send_amount as u8)?;
        buf.write_u16_be(0)?; // array LOB fields
        buf.write_u16_be(0)?;
        buf.write_u16_be(0)?;

        if !self.locator.is_empty() {
            buf.write_bytes(&self.locator)?;
        }
        if is_create_temp {
            buf.write_ub4(charset::UTF8 as u32)?;
        }
        if let Some(data) = &self.write_data {
            buf.write_u8(MessageType::LobData as u8)?;
            buf.write_bytes_with_length(Some(data))?;
        }
        if self.send_amount {
            buf.write_ub8(self.amount)?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        _caps: &Capabilities,
    ) -> Result<()> {
        match message_type {
            MessageType::LobData => {
                if let Some(chunk) = buf.read_bytes_with_length()? {
                    self.outcome.data.extend_from_slice(&chunk);
                }
                Ok(())
            }
            MessageType::Parameter => {
                // Updated locator, then the amount when one was requested.
                if !self.locator.is_empty() {
                    let updated = buf.read_bytes(self.locator.len())?;
                    self.outcome.updated_locator = Some(updated);
                }
                if self.send_amount {
                    self.outcome.amount = buf.read_ub8()?;
                }
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {other:?} in LOB response"
            ))),
        }
    }

    fn state(&mut self) -> &mut MessageState {
        &mut self.state
    }

    fn state_ref(&self) -> &MessageState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PacketType;

    fn body_of(call: &mut LobCall) -> Vec<u8> {
        let caps = Capabilities::new();
        let mut buf = WriteBuffer::new(32768, true);
        buf.start_request(PacketType::Data, 0);
        call.write(&mut buf, &caps).unwrap();
        let packets = buf.end_request_raw();
        packets[0][10..].to_vec()
    }

    #[test]
    fn read_request_shape() {
        let mut call = LobCall::read(vec![1, 2, 3, 4], 1, 100, 9);
        let body = body_of(&mut call);
        assert_eq!(body[0], MessageType::Function as u8);
        assert_eq!(body[1], FunctionCode::LobOp as u8);
        assert_eq!(body[2], 9);
        // Locator rides at the end before the amount.
        assert!(body.windows(4).any(|w| w == [1, 2, 3, 4]));
    }

    #[test]
    fn write_carries_data_message() {
        let mut call = LobCall::write(vec![1, 2, 3, 4], 1, b"payload".to_vec(), 1);
        let body = body_of(&mut call);
        let pos = body
            .iter()
            .position(|&b| b == MessageType::LobData as u8)
            .expect("LobData marker");
        assert_eq!(body[pos + 1], 7); // length byte
        assert_eq!(&body[pos + 2..pos + 9], b"payload");
    }

    #[test]
    fn read_response_accumulates_chunks() {
        let caps = Capabilities::new();
        let mut call = LobCall::read(vec![1, 2, 3, 4], 1, 100, 1);
        let mut buf = ReadBuffer::from_slice(&[3, b'a', b'b', b'c']);
        call.process(MessageType::LobData, &mut buf, &caps).unwrap();
        let mut buf = ReadBuffer::from_slice(&[2, b'd', b'e']);
        call.process(MessageType::LobData, &mut buf, &caps).unwrap();
        assert_eq!(call.outcome.data, b"abcde");
    }

    #[test]
    fn parameter_returns_locator_and_amount() {
        let caps = Capabilities::new();
        let mut call = LobCall::length(vec![0u8; 4], 1);
        let mut payload = vec![9u8, 9, 9, 9];
        payload.extend_from_slice(&[1, 42]); // ub8 amount = 42
        let mut buf = ReadBuffer::from_slice(&payload);
        call.process(MessageType::Parameter, &mut buf, &caps)
            .unwrap();
        assert_eq!(call.outcome.amount, 42);
        assert_eq!(
            call.outcome.updated_locator.as_deref(),
            Some(&[9u8, 9, 9, 9][..])
        );
    }

    #[test]
    fn create_temp_parameters() {
        let mut call = LobCall::create_temp(OraType::Clob, 1);
        assert_eq!(call.dest_offset, OraType::Clob as u64);
        assert_eq!(call.dest_length, lob_locator::DURATION_SESSION as u32);
        let body = body_of(&mut call);
        assert!(!body.is_empty());
    }
}
