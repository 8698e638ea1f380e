//! TTC message codecs.
//!
//! Every request/response exchange is a [`TtcMessage`]: `write` serializes
//! the request into a [`WriteBuffer`], `process` handles the response
//! message types specific to that exchange. The shared walker in this
//! module drives the response stream, handling the cross-cutting message
//! types (error blocks, warnings, status, server piggybacks, end-of-request
//! boundaries) and delegating the rest.
//!
//! Decoding is resumable: the engine takes a restore point before each
//! message and rewinds on [`Error::OutOfPackets`] to retry after more
//! packets arrive.

mod auth;
mod connect;
mod data_types;
mod describe;
mod execute;
mod fetch;
mod lob_op;
mod pipeline;
mod protocol;
mod simple;

pub use auth::{AuthExchange, FastAuthExchange, SessionInfo};
pub use connect::{AcceptInfo, ConnectRequest, RedirectInfo, RefuseInfo};
pub use data_types::DataTypesExchange;
pub use describe::parse_describe_info;
pub use execute::{ExecuteCall, ExecuteOptions, ExecuteOutcome};
pub use fetch::FetchCall;
pub use lob_op::{LobCall, LobOutcome};
pub use pipeline::{PipelineCall, PipelineOperation, PipelineResult};
pub use protocol::ProtocolExchange;
pub use simple::{CommitCall, LogoffCall, PingCall, RollbackCall, SessionReleaseCall};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{piggyback_op, FunctionCode, MessageType};
use crate::error::{Error, Result, ServerError};
use crate::types::RowId;

/// Decoded server error block.
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    /// ORA error number, zero when the call succeeded
    pub code: u32,
    /// Error message text
    pub message: String,
    /// Error position within the SQL text
    pub pos: u16,
    /// Cursor id assigned or confirmed by the server
    pub cursor_id: u16,
    /// Rowid associated with the error
    pub rowid: Option<RowId>,
    /// Rows affected by the call
    pub row_count: u64,
    /// Per-iteration errors collected under batch-error mode
    pub batch_errors: Vec<ServerError>,
}

/// Cross-cutting response state shared by every message.
#[derive(Debug, Default)]
pub struct MessageState {
    /// The last error block
    pub error_info: ErrorInfo,
    /// An error block with a non-zero code arrived
    pub error_occurred: bool,
    /// The codec asks the engine to re-run this message once
    pub retry: bool,
    /// The codec asks the engine to serialize and send again (auth round
    /// two, server RESEND)
    pub resend: bool,
    /// The server withheld OUT binds pending an explicit flush
    pub flush_out_binds: bool,
    /// Call status bitfield from the last status/error block
    pub call_status: u32,
    /// The response stream is complete
    pub end_of_response: bool,
    /// A warning block, kept but not raised
    pub warning: Option<ServerError>,
}

impl MessageState {
    /// Reset per-send state while keeping accumulated results.
    pub fn begin_round_trip(&mut self) {
        self.error_info = ErrorInfo::default();
        self.error_occurred = false;
        self.resend = false;
        self.flush_out_binds = false;
        self.end_of_response = false;
    }

    /// Surface the error block as a classified error.
    pub fn server_error(&self) -> Option<Error> {
        if !self.error_occurred || self.error_info.code == 0 {
            return None;
        }
        let mut err = ServerError::new(self.error_info.code, self.error_info.message.clone());
        err.offset = self.error_info.pos;
        err.rowid = self.error_info.rowid.as_ref().and_then(|r| r.display());
        Some(Error::from_server(err))
    }
}

/// One TTC request/response exchange.
pub trait TtcMessage: Send {
    /// Serialize the request.
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()>;

    /// Handle a response message type the shared walker does not cover.
    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()>;

    /// Mutable access to the shared state.
    fn state(&mut self) -> &mut MessageState;

    /// Shared state.
    fn state_ref(&self) -> &MessageState;
}

/// Write the common function-call header: message type, function code,
/// sequence number, and the token field on 23ai servers.
pub(crate) fn write_function_header(
    buf: &mut WriteBuffer,
    function: FunctionCode,
    sequence: u8,
    caps: &Capabilities,
) -> Result<()> {
    buf.write_u8(MessageType::Function as u8)?;
    buf.write_u8(function as u8)?;
    buf.write_u8(sequence)?;
    if caps.needs_token_field() {
        buf.write_ub8(0)?;
    }
    Ok(())
}

/// Write a piggybacked close-cursors call ahead of the main function.
pub(crate) fn write_close_cursors_piggyback(
    buf: &mut WriteBuffer,
    cursor_ids: &[u16],
    sequence: u8,
    caps: &Capabilities,
) -> Result<()> {
    buf.write_u8(MessageType::Piggyback as u8)?;
    buf.write_u8(FunctionCode::CloseCursors as u8)?;
    buf.write_u8(sequence)?;
    if caps.needs_token_field() {
        buf.write_ub8(0)?;
    }
    buf.write_u8(1)?; // pointer: cursor id array follows
    buf.write_ub4(cursor_ids.len() as u32)?;
    for &id in cursor_ids {
        buf.write_ub4(id as u32)?;
    }
    Ok(())
}

/// Decode exactly one response message, dispatching unknown types to the
/// codec. Returns after the message is fully consumed; the caller loops
/// until `state.end_of_response`.
pub(crate) fn process_one_message(
    msg: &mut dyn TtcMessage,
    buf: &mut ReadBuffer,
    caps: &Capabilities,
) -> Result<()> {
    let ty = MessageType::try_from(buf.read_u8()?)?;
    match ty {
        MessageType::Error => {
            parse_error_block(msg.state(), buf, caps)?;
            if !caps.supports_end_of_request {
                msg.state().end_of_response = true;
            }
        }
        MessageType::Warning => {
            let warning = parse_warning_block(buf)?;
            msg.state().warning = warning;
        }
        MessageType::Status => {
            let call_status = buf.read_ub4()?;
            buf.skip_ub()?; // end-to-end sequence number
            let state = msg.state();
            state.call_status = call_status;
            if !caps.supports_end_of_request {
                state.end_of_response = true;
            }
        }
        MessageType::ServerSidePiggyback => parse_server_piggyback(buf)?,
        MessageType::EndOfRequest => msg.state().end_of_response = true,
        MessageType::FlushOutBinds => {
            let state = msg.state();
            state.flush_out_binds = true;
            if !caps.supports_end_of_request {
                state.end_of_response = true;
            }
        }
        other => msg.process(other, buf, caps)?,
    }
    Ok(())
}

/// Parse the error block that terminates most calls. Also carries the
/// cursor id, row count, and batch error arrays.
pub(crate) fn parse_error_block(
    state: &mut MessageState,
    buf: &mut ReadBuffer,
    caps: &Capabilities,
) -> Result<()> {
    let call_status = buf.read_ub4()?;
    buf.skip_ub()?; // end-to-end sequence
    buf.skip_ub()?; // current row number
    buf.skip_ub()?; // error number (duplicate)
    buf.skip_ub()?; // array element w/ error
    buf.skip_ub()?; // array element error number
    let cursor_id = buf.read_ub2()?;
    let pos = buf.read_sb2()?;
    buf.skip(6)?; // sql type, fatal flag, flags, cursor opts, UPI, warning flag
    let rowid = parse_wire_rowid(buf)?;
    buf.skip_ub()?; // OS error
    buf.skip(2)?; // statement number, call number
    buf.skip_ub()?; // padding
    buf.skip_ub()?; // successful iterations

    // Logical rowid
    let oerrdd_len = buf.read_ub4()?;
    if oerrdd_len > 0 {
        buf.skip_bytes_with_length()?;
    }

    // Batch error codes
    let mut batch_codes: Vec<u16> = Vec::new();
    let num_codes = buf.read_ub2()?;
    if num_codes > 0 {
        let first = buf.read_u8()?;
        let chunked = first == crate::constants::length::LONG_FORM;
        for _ in 0..num_codes {
            if chunked {
                buf.skip_ub()?; // chunk length
            }
            batch_codes.push(buf.read_ub2()?);
        }
        if chunked {
            buf.skip_ub()?; // terminator
        }
    }

    // Batch error row offsets
    let mut batch_offsets: Vec<u32> = Vec::new();
    let num_offsets = buf.read_ub4()?;
    if num_offsets > 0 {
        if num_offsets > 65535 {
            return Err(Error::Protocol(format!(
                "batch error offset count {num_offsets} out of range"
            )));
        }
        let first = buf.read_u8()?;
        let chunked = first == crate::constants::length::LONG_FORM;
        for _ in 0..num_offsets {
            if chunked {
                buf.skip_ub()?;
            }
            batch_offsets.push(buf.read_ub4()?);
        }
        if chunked {
            buf.skip_ub()?;
        }
    }

    // Batch error messages
    let mut batch_messages: Vec<String> = Vec::new();
    let num_messages = buf.read_ub2()?;
    if num_messages > 0 {
        buf.skip(1)?;
        for _ in 0..num_messages {
            buf.skip_ub()?; // cursor id of the failing iteration
            let message = buf
                .read_str_with_length()?
                .unwrap_or_default()
                .trim_end_matches('\n')
                .to_string();
            batch_messages.push(message);
        }
    }

    let code = buf.read_ub4()?;
    let row_count = buf.read_ub8()?;

    // 20c introduced two trailing fields.
    if caps.ttc_field_version >= crate::constants::ccap_value::FIELD_VERSION_21_1 {
        buf.skip_ub()?; // SQL type
        buf.skip_ub()?; // server checksum
    }

    let message = if code != 0 {
        buf.read_str_with_length()?
            .unwrap_or_default()
            .trim_end_matches('\n')
            .to_string()
    } else {
        String::new()
    };

    let info = &mut state.error_info;
    info.code = code;
    info.message = message;
    info.pos = pos.max(0) as u16;
    info.cursor_id = cursor_id;
    info.rowid = rowid.filter(|r| r.is_valid());
    info.row_count = row_count;
    info.batch_errors = batch_codes
        .iter()
        .zip(batch_offsets.iter().chain(std::iter::repeat(&0)))
        .zip(
            batch_messages
                .iter()
                .map(String::as_str)
                .chain(std::iter::repeat("")),
        )
        .map(|((&code, &offset), message)| {
            let mut err = ServerError::new(code as u32, message);
            err.row_offset = offset as u64;
            err
        })
        .collect();

    state.call_status = call_status;
    state.error_occurred = code != 0;
    Ok(())
}

/// Parse a warning block: code, message length, flags, then the text.
pub(crate) fn parse_warning_block(buf: &mut ReadBuffer) -> Result<Option<ServerError>> {
    let code = buf.read_ub2()? as u32;
    let length = buf.read_ub2()? as usize;
    buf.skip_ub()?; // flags
    if code == 0 || length == 0 {
        return Ok(None);
    }
    let raw = buf.read_bytes(length)?;
    let mut warning = ServerError::new(code, String::from_utf8_lossy(&raw).into_owned());
    warning.is_warning = true;
    Ok(Some(warning))
}

/// Parse the rowid form used inside error blocks: four length-prefixed
/// fields.
pub(crate) fn parse_wire_rowid(buf: &mut ReadBuffer) -> Result<Option<RowId>> {
    let object_id = buf.read_ub4()?;
    let file_num = buf.read_ub2()?;
    let block_num = buf.read_ub4()?;
    let slot_num = buf.read_ub2()?;
    let rowid = RowId {
        object_id,
        file_num,
        block_num,
        slot_num,
    };
    Ok(if rowid.is_valid() { Some(rowid) } else { None })
}

/// Consume a server-side piggyback message. These carry session state
/// changes that ride along with any response; the driver skips the payloads
/// it has no use for.
pub(crate) fn parse_server_piggyback(buf: &mut ReadBuffer) -> Result<()> {
    let opcode = buf.read_u8()?;
    match opcode {
        piggyback_op::LTXID => {
            let length = buf.read_ub4()?;
            if length > 0 {
                buf.skip_bytes_with_length()?;
            }
        }
        piggyback_op::QUERY_CACHE_INVALIDATION
        | piggyback_op::TRACE_EVENT
        | piggyback_op::SESS_SIGNATURE => {}
        piggyback_op::OS_PID_MTS => {
            buf.skip_ub()?;
            buf.skip_bytes_with_length()?;
        }
        piggyback_op::SYNC | piggyback_op::SESS_RET => {
            buf.skip_ub()?; // data type count
            buf.skip(1)?; // array header
            let pairs = buf.read_ub2()?;
            if pairs > 0 {
                buf.skip(1)?;
                for _ in 0..pairs {
                    let key_len = buf.read_ub2()?;
                    if key_len > 0 {
                        buf.skip_bytes_with_length()?;
                    }
                    let value_len = buf.read_ub2()?;
                    if value_len > 0 {
                        buf.skip_bytes_with_length()?;
                    }
                    buf.skip_ub()?; // flags
                }
            }
            buf.skip_ub()?; // session flags
            if opcode == piggyback_op::SESS_RET {
                buf.skip_ub()?; // session id
                buf.skip_ub()?; // serial number
            }
        }
        piggyback_op::EXT_SYNC => {
            buf.skip_ub()?;
            buf.skip(1)?;
        }
        piggyback_op::AC_REPLAY_CONTEXT => {
            buf.skip_ub()?; // data type count
            buf.skip(1)?; // array header
            buf.skip_ub()?; // flags
            buf.skip_ub()?; // error code
            buf.skip(1)?; // queue
            let length = buf.read_ub4()?;
            if length > 0 {
                buf.skip_bytes_with_length()?;
            }
        }
        other => {
            return Err(Error::Protocol(format!(
                "unknown server piggyback opcode {other}"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteBuffer;
    use crate::constants::PacketType;

    struct Probe {
        state: MessageState,
        seen: Vec<MessageType>,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                state: MessageState::default(),
                seen: Vec::new(),
            }
        }
    }

    impl TtcMessage for Probe {
        fn write(&mut self, _buf: &mut WriteBuffer, _caps: &Capabilities) -> Result<()> {
            Ok(())
        }
        fn process(
            &mut self,
            message_type: MessageType,
            _buf: &mut ReadBuffer,
            _caps: &Capabilities,
        ) -> Result<()> {
            self.seen.push(message_type);
            Ok(())
        }
        fn state(&mut self) -> &mut MessageState {
            &mut self.state
        }
        fn state_ref(&self) -> &MessageState {
            &self.state
        }
    }

    #[test]
    fn end_of_request_terminates() {
        let caps = Capabilities::new();
        let mut probe = Probe::new();
        let mut buf = ReadBuffer::from_slice(&[MessageType::EndOfRequest as u8]);
        process_one_message(&mut probe, &mut buf, &caps).unwrap();
        assert!(probe.state.end_of_response);
    }

    #[test]
    fn status_block() {
        let caps = Capabilities::new();
        let mut probe = Probe::new();
        // status: ub4 call_status=2, ub2 seq=0
        let mut buf = ReadBuffer::from_slice(&[MessageType::Status as u8, 0x01, 0x02, 0x00]);
        process_one_message(&mut probe, &mut buf, &caps).unwrap();
        assert_eq!(probe.state.call_status, 2);
        // No explicit boundaries negotiated: the status ends the response.
        assert!(probe.state.end_of_response);
    }

    #[test]
    fn flush_out_binds_flag() {
        let caps = Capabilities::new();
        let mut probe = Probe::new();
        let mut buf = ReadBuffer::from_slice(&[MessageType::FlushOutBinds as u8]);
        process_one_message(&mut probe, &mut buf, &caps).unwrap();
        assert!(probe.state.flush_out_binds);
    }

    #[test]
    fn unknown_types_delegate() {
        let caps = Capabilities::new();
        let mut probe = Probe::new();
        let mut buf = ReadBuffer::from_slice(&[MessageType::RowHeader as u8]);
        process_one_message(&mut probe, &mut buf, &caps).unwrap();
        assert_eq!(probe.seen, vec![MessageType::RowHeader]);
    }

    #[test]
    fn warning_block_parses() {
        let mut wb = WriteBuffer::new(8192, true);
        wb.start_request(PacketType::Data, 0);
        wb.write_ub2(24347).unwrap();
        wb.write_ub2(4).unwrap();
        wb.write_ub4(0).unwrap();
        wb.write_bytes(b"warn").unwrap();
        let packets = wb.end_request_raw();
        let mut buf = ReadBuffer::from_bytes(packets[0].slice(10..));
        let warning = parse_warning_block(&mut buf).unwrap().unwrap();
        assert_eq!(warning.code, 24347);
        assert_eq!(warning.message, "warn");
        assert!(warning.is_warning);
    }

    #[test]
    fn error_block_round_trip() {
        // Build a minimal error block the parser accepts.
        let mut wb = WriteBuffer::new(8192, true);
        wb.start_request(PacketType::Data, 0);
        wb.write_ub4(4).unwrap(); // call status
        wb.write_ub2(0).unwrap(); // end-to-end seq
        wb.write_ub4(0).unwrap(); // current row
        wb.write_ub2(0).unwrap(); // dup error
        wb.write_ub2(0).unwrap(); // array elem
        wb.write_ub2(0).unwrap(); // array elem errno
        wb.write_ub2(17).unwrap(); // cursor id
        wb.write_u8(0).unwrap(); // pos (sb2, zero form)
        wb.write_zeros(6).unwrap(); // flag bytes
        wb.write_ub4(0).unwrap(); // rowid.object
        wb.write_ub2(0).unwrap();
        wb.write_ub4(0).unwrap();
        wb.write_ub2(0).unwrap();
        wb.write_ub4(0).unwrap(); // os error
        wb.write_zeros(2).unwrap(); // stmt#, call#
        wb.write_ub2(0).unwrap(); // padding
        wb.write_ub4(0).unwrap(); // success iters
        wb.write_ub4(0).unwrap(); // oerrdd
        wb.write_ub2(0).unwrap(); // batch codes
        wb.write_ub4(0).unwrap(); // batch offsets
        wb.write_ub2(0).unwrap(); // batch messages
        wb.write_ub4(1017).unwrap(); // error number
        wb.write_ub8(0).unwrap(); // row count
        wb.write_str_with_length(Some("ORA-01017: invalid username/password\n"))
            .unwrap();
        let packets = wb.end_request_raw();

        let caps = Capabilities {
            ttc_field_version: crate::constants::ccap_value::FIELD_VERSION_19_1,
            ..Capabilities::new()
        };
        let mut state = MessageState::default();
        let mut buf = ReadBuffer::from_bytes(packets[0].slice(10..));
        parse_error_block(&mut state, &mut buf, &caps).unwrap();

        assert!(state.error_occurred);
        assert_eq!(state.error_info.code, 1017);
        assert_eq!(state.error_info.cursor_id, 17);
        assert_eq!(
            state.error_info.message,
            "ORA-01017: invalid username/password"
        );
        let err = state.server_error().unwrap();
        assert!(matches!(err, Error::Database(_)));
    }
}
