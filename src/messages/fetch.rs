//! Fetch message (function code 5).
//!
//! Requests more rows for an open cursor. The response is the same row
//! stream the execute call produces: row headers, optional bit vectors,
//! row data, then the terminating error block (ORA-01403 signals
//! exhaustion rather than failure).

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{FunctionCode, MessageType};
use crate::error::{Error, Result};
use crate::row::{NumberShape, Row};
use crate::statement::ColumnInfo;

use super::execute::RowReader;
use super::{parse_describe_info, write_function_header, MessageState, TtcMessage};

/// The fetch call codec.
#[derive(Debug)]
pub struct FetchCall {
    state: MessageState,
    cursor_id: u16,
    num_rows: u32,
    sequence: u8,
    reader: RowReader,
    /// Rows delivered this round
    pub rows: Vec<Row>,
    /// Updated column metadata, when the server re-described
    pub columns: Option<Vec<ColumnInfo>>,
}

impl FetchCall {
    /// Fetch up to `num_rows` rows from the cursor.
    pub fn new(
        cursor_id: u16,
        num_rows: u32,
        columns: Vec<ColumnInfo>,
        number_shape: NumberShape,
        sequence: u8,
    ) -> Self {
        let mut reader = RowReader {
            number_shape,
            ..RowReader::default()
        };
        reader.set_columns(columns);
        Self {
            state: MessageState::default(),
            cursor_id,
            num_rows,
            sequence,
            reader,
            rows: Vec::new(),
            columns: None,
        }
    }
}

impl TtcMessage for FetchCall {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::Fetch, self.sequence, caps)?;
        buf.write_ub4(self.cursor_id as u32)?;
        buf.write_ub4(self.num_rows)?;
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()> {
        match message_type {
            MessageType::DescribeInfo => {
                let columns = parse_describe_info(buf, caps)?;
                self.reader.set_columns(columns.clone());
                self.columns = Some(columns);
                Ok(())
            }
            MessageType::RowHeader => self.reader.read_row_header(buf),
            MessageType::BitVector => self.reader.read_bit_vector(buf),
            MessageType::RowData => {
                let row = self.reader.read_row(buf, caps)?;
                self.rows.push(row);
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {other:?} in fetch response"
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
