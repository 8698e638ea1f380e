//! Execute message (function codes 94, 4 and 78).
//!
//! One round trip bundles parse, bind, execute, describe and the first
//! fetch, selected by the option bitmap. Re-executions of a cached cursor
//! drop the SQL text and use the re-execute function codes. The response
//! interleaves describe info, row headers with compressed-fetch bit
//! vectors, row data, the bind-direction vector, OUT bind parameter blocks
//! and implicit result announcements, terminated by the error block.

use std::sync::Arc;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{
    bind_flags, ccap_value, charset, csfrm, exec_flags, exec_option, lob_locator, BindDirection,
    FunctionCode, MessageType, OraType, MAX_LONG_LENGTH,
};
use crate::error::{Error, Result, ServerError};
use crate::row::{decode_column, NumberShape, Row, Value};
use crate::statement::{ColumnInfo, Statement};
use crate::types::{
    encode_binary_double, encode_date, encode_number, encode_oson, encode_timestamp,
    encode_vector,
};
use crate::variable::Variable;

use super::{parse_describe_info, write_function_header, MessageState, TtcMessage};

/// Options sampled at execute time.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Rows delivered with the execute response
    pub prefetch_rows: u32,
    /// Iteration count for array DML
    pub num_iters: u32,
    /// Collect per-iteration errors instead of aborting
    pub batch_errors: bool,
    /// Request per-iteration row counts
    pub dml_row_counts: bool,
    /// Commit on success
    pub auto_commit: bool,
    /// Parse and describe without executing
    pub describe_only: bool,
    /// Server-side scrollable negotiation flag
    pub scrollable: bool,
    /// NUMBER materialization for fetched columns
    pub number_shape: NumberShape,
}

/// Everything an execute round trip produced.
#[derive(Debug, Default)]
pub struct ExecuteOutcome {
    /// Columns described this round, when any
    pub columns: Option<Vec<ColumnInfo>>,
    /// Rows delivered with the response
    pub rows: Vec<Row>,
    /// The cursor has more rows to fetch
    pub more_rows: bool,
    /// Rows affected
    pub row_count: u64,
    /// Per-iteration errors under batch-error mode
    pub batch_errors: Vec<ServerError>,
    /// Per-iteration row counts when requested
    pub dml_row_counts: Vec<u64>,
    /// RETURNING INTO values: per OUT bind, per iteration
    pub returning_values: Vec<Vec<Vec<Value>>>,
    /// OUT bind values for PL/SQL
    pub out_values: Vec<Vec<Value>>,
    /// Cursor ids of implicit result sets
    pub implicit_cursors: Vec<u16>,
}

/// Shared row-stream reader used by execute and fetch responses.
#[derive(Debug, Default)]
pub(crate) struct RowReader {
    pub columns: Vec<ColumnInfo>,
    pub names: Arc<Vec<String>>,
    pub number_shape: NumberShape,
    pub(crate) bit_vector: Option<Vec<u8>>,
    pub(crate) previous: Option<Row>,
}

impl RowReader {
    pub fn set_columns(&mut self, columns: Vec<ColumnInfo>) {
        self.names = Arc::new(columns.iter().map(|c| c.name.clone()).collect());
        self.columns = columns;
        self.previous = None;
        self.bit_vector = None;
    }

    /// A RowHeader announces the shape of the following row data, including
    /// the optional compressed-fetch bit vector.
    pub fn read_row_header(&mut self, buf: &mut ReadBuffer) -> Result<()> {
        buf.skip(1)?; // flags
        buf.skip_ub()?; // request count
        buf.skip_ub()?; // iteration number
        buf.skip_ub()?; // iterations this round
        buf.skip_ub()?; // uac buffer length
        let bitvec_len = buf.read_ub4()?;
        if bitvec_len > 0 {
            self.bit_vector = buf.read_bytes_with_length()?;
        }
        if buf.read_ub4()? > 0 {
            buf.skip_bytes_with_length()?; // rxhrid
        }
        Ok(())
    }

    pub fn read_bit_vector(&mut self, buf: &mut ReadBuffer) -> Result<()> {
        let num_bytes = self.columns.len() / 8 + usize::from(self.columns.len() % 8 > 0);
        self.bit_vector = Some(buf.read_bytes(num_bytes)?.to_vec());
        Ok(())
    }

    fn column_is_fresh(&self, index: usize) -> bool {
        match &self.bit_vector {
            None => true,
            Some(bits) => bits
                .get(index / 8)
                .map(|byte| byte & (1 << (index % 8)) != 0)
                .unwrap_or(true),
        }
    }

    /// Decode one row, copying suppressed columns from the previous row.
    pub fn read_row(&mut self, buf: &mut ReadBuffer, caps: &Capabilities) -> Result<Row> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (i, col) in self.columns.iter().enumerate() {
            if self.column_is_fresh(i) {
                values.push(decode_column(buf, col, caps, self.number_shape)?);
            } else {
                let prev = self
                    .previous
                    .as_ref()
                    .and_then(|row| row.get(i).cloned())
                    .ok_or_else(|| {
                        Error::Protocol("duplicate column without a previous row".into())
                    })?;
                values.push(prev);
            }
        }
        let row = Row::new(values, Arc::clone(&self.names));
        self.previous = Some(row.clone());
        self.bit_vector = None;
        Ok(row)
    }
}

/// The execute call codec.
#[derive(Debug)]
pub struct ExecuteCall {
    state: MessageState,
    statement: Statement,
    options: ExecuteOptions,
    bind_rows: Vec<Vec<Value>>,
    bind_vars: Vec<Variable>,
    sequence: u8,
    reader: RowReader,
    /// Results of the round trip
    pub outcome: ExecuteOutcome,
}

impl ExecuteCall {
    /// Build an execute call. `bind_rows` holds one value vector per
    /// iteration; `bind_vars` carries the variable metadata per position.
    pub fn new(
        statement: Statement,
        options: ExecuteOptions,
        bind_vars: Vec<Variable>,
        bind_rows: Vec<Vec<Value>>,
        sequence: u8,
    ) -> Self {
        let mut reader = RowReader {
            number_shape: options.number_shape,
            ..RowReader::default()
        };
        if !statement.columns().is_empty() {
            reader.set_columns(statement.columns().to_vec());
        }
        Self {
            state: MessageState::default(),
            statement,
            options,
            bind_rows,
            bind_vars,
            sequence,
            reader,
            outcome: ExecuteOutcome::default(),
        }
    }

    /// Recover the statement and results.
    pub fn finish(mut self) -> (Statement, ExecuteOutcome) {
        if let Some(columns) = self.outcome.columns.take() {
            self.statement.set_columns(columns.clone());
            self.outcome.columns = Some(columns);
        }
        let info = &self.state.error_info;
        if info.cursor_id != 0 {
            self.statement.set_cursor_id(info.cursor_id);
        }
        self.statement.set_executed(true);
        self.outcome.row_count = info.row_count;
        self.outcome.batch_errors = info.batch_errors.clone();
        self.statement
            .set_last_rowid(info.rowid);
        (self.statement, self.outcome)
    }

    fn function_code(&self) -> FunctionCode {
        let stmt = &self.statement;
        let needs_full_execute = stmt.cursor_id() == 0
            || !stmt.executed()
            || stmt.sql().is_empty()
            || stmt.is_ddl()
            || stmt.requires_define()
            || self.options.describe_only
            || self.options.batch_errors
            || self.options.scrollable;
        if needs_full_execute {
            FunctionCode::Execute
        } else if stmt.is_query() && self.options.prefetch_rows > 0 {
            FunctionCode::ReexecuteAndFetch
        } else {
            FunctionCode::Reexecute
        }
    }

    fn option_bits(&self) -> (u32, u32) {
        let stmt = &self.statement;
        let opts = &self.options;
        let num_binds = self.bind_vars.len() as u32;
        let mut exec_opts = 0u32;
        let mut flags = 0u32;

        if stmt.requires_define() {
            exec_opts |= exec_option::DEFINE;
        } else if !opts.describe_only && !stmt.sql().is_empty() {
            flags |= exec_flags::IMPLICIT_RESULTSET;
            exec_opts |= exec_option::EXECUTE;
        }
        if stmt.cursor_id() == 0 || stmt.is_ddl() {
            exec_opts |= exec_option::PARSE;
        }
        if opts.describe_only {
            exec_opts |= exec_option::DESCRIBE;
        } else if stmt.is_query() && opts.prefetch_rows > 0 && !stmt.no_prefetch() {
            exec_opts |= exec_option::FETCH;
        }
        if !stmt.is_plsql() && !opts.describe_only {
            exec_opts |= exec_option::NOT_PLSQL;
        } else if stmt.is_plsql() && num_binds > 0 {
            exec_opts |= exec_option::PLSQL_BIND;
        }
        if num_binds > 0 {
            exec_opts |= exec_option::BIND;
        }
        if opts.batch_errors {
            exec_opts |= exec_option::BATCH_ERRORS;
        }
        if opts.auto_commit && !opts.describe_only {
            exec_opts |= exec_option::COMMIT;
        }
        if opts.dml_row_counts {
            flags |= exec_flags::DML_ROWCOUNTS;
        }
        if opts.scrollable {
            flags |= exec_flags::SCROLLABLE | exec_flags::NO_CANCEL_ON_EOF;
        }
        (exec_opts, flags)
    }

    fn write_execute(&self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        let stmt = &self.statement;
        let opts = &self.options;
        let (exec_opts, flags) = self.option_bits();
        let num_binds = self.bind_vars.len() as u32;
        let parse = stmt.cursor_id() == 0 || stmt.is_ddl();

        let num_iters = if stmt.is_query() {
            opts.prefetch_rows
        } else {
            opts.num_iters.max(1)
        };

        buf.write_ub4(exec_opts)?;
        buf.write_ub4(stmt.cursor_id() as u32)?;
        if parse {
            buf.write_u8(1)?; // SQL text pointer
            buf.write_ub4(stmt.sql().len() as u32)?;
        } else {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
        }
        buf.write_u8(1)?; // al8i4 pointer
        buf.write_ub4(13)?; // al8i4 length
        buf.write_u8(0)?; // al8o4 pointer
        buf.write_u8(0)?; // al8o4l pointer
        buf.write_ub4(0)?; // prefetch buffer size
        buf.write_ub4(num_iters)?; // prefetch rows
        buf.write_ub4(MAX_LONG_LENGTH)?; // maximum LONG size

        if num_binds == 0 {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
        } else {
            buf.write_u8(1)?;
            buf.write_ub4(num_binds)?;
        }
        buf.write_u8(0)?; // al8app
        buf.write_u8(0)?; // al8txn
        buf.write_u8(0)?; // al8txl
        buf.write_u8(0)?; // al8kv
        buf.write_u8(0)?; // al8kvl

        if stmt.requires_define() {
            buf.write_u8(1)?;
            buf.write_ub4(stmt.columns().len() as u32)?;
        } else {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
        }
        buf.write_ub4(0)?; // registration id
        buf.write_u8(0)?; // al8objlist
        buf.write_u8(1)?; // al8objlen
        buf.write_u8(0)?; // al8blv
        buf.write_ub4(0)?; // al8blvl
        buf.write_u8(0)?; // al8dnam
        buf.write_ub4(0)?; // al8dnaml
        buf.write_ub4(0)?; // al8regid_msb

        if opts.dml_row_counts {
            buf.write_u8(1)?;
            buf.write_ub4(opts.num_iters.max(1))?;
            buf.write_u8(1)?;
        } else {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
            buf.write_u8(0)?;
        }

        if caps.ttc_field_version >= ccap_value::FIELD_VERSION_12_2 {
            buf.write_u8(0)?; // al8sqlsig
            buf.write_ub4(0)?;
            buf.write_u8(0)?; // SQL id
            buf.write_ub4(0)?;
            buf.write_u8(0)?;
            if caps.ttc_field_version >= ccap_value::FIELD_VERSION_12_2_EXT_1 {
                buf.write_u8(0)?; // chunk ids
                buf.write_ub4(0)?;
            }
        }

        if parse {
            buf.write_bytes_with_length(Some(stmt.sql().as_bytes()))?;
            buf.write_ub4(1)?; // al8i4[0]: parse
        } else {
            buf.write_ub4(0)?;
        }
        // al8i4[1]: iteration count
        if stmt.is_query() {
            buf.write_ub4(if stmt.cursor_id() == 0 { 0 } else { num_iters })?;
        } else {
            buf.write_ub4(opts.num_iters.max(1))?;
        }
        buf.write_ub4(0)?; // al8i4[2]
        buf.write_ub4(0)?; // al8i4[3]
        buf.write_ub4(0)?; // al8i4[4]
        buf.write_ub4(0)?; // al8i4[5] SCN low
        buf.write_ub4(0)?; // al8i4[6] SCN high
        buf.write_ub4(u32::from(stmt.is_query()))?; // al8i4[7]
        buf.write_ub4(0)?; // al8i4[8]
        buf.write_ub4(flags)?; // al8i4[9]
        // Scrollable cursors pin the fetch orientation to CURRENT.
        let (fetch_ori, fetch_pos) = if opts.scrollable { (1, 1) } else { (0, 0) };
        buf.write_ub4(fetch_ori)?; // al8i4[10]
        buf.write_ub4(fetch_pos)?; // al8i4[11]
        buf.write_ub4(0)?; // al8i4[12]

        if stmt.requires_define() {
            self.write_column_defines(buf, caps)?;
        } else if !self.bind_vars.is_empty() {
            self.write_bind_metadata(buf, caps)?;
            self.write_bind_rows(buf)?;
        }
        Ok(())
    }

    fn write_reexecute(&self, buf: &mut WriteBuffer, _caps: &Capabilities) -> Result<()> {
        let opts = &self.options;
        let num_iters = if self.statement.is_query() {
            opts.prefetch_rows.max(1)
        } else {
            opts.num_iters.max(1)
        };
        buf.write_ub4(self.statement.cursor_id() as u32)?;
        buf.write_ub4(num_iters)?;
        let mut exec_opts = 0u32;
        if opts.auto_commit {
            exec_opts |= exec_option::COMMIT;
        }
        buf.write_ub4(exec_opts)?;
        buf.write_ub4(0)?;
        if !self.bind_rows.is_empty() {
            self.write_bind_rows(buf)?;
        }
        Ok(())
    }

    fn write_column_defines(&self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        for col in self.statement.columns() {
            let mut ora_type = col.ora_type;
            let mut buffer_size = col.buffer_size;
            let mut lob_prefetch = 0u32;
            let mut cont_flag = 0u64;

            if matches!(ora_type, OraType::Rowid | OraType::Urowid) {
                ora_type = OraType::Varchar;
                buffer_size = crate::constants::MAX_UROWID_LENGTH;
            }
            match col.ora_type {
                OraType::Blob | OraType::Clob => cont_flag = lob_locator::PREFETCH_FLAG,
                OraType::Json | OraType::Vector => {
                    cont_flag = lob_locator::PREFETCH_FLAG;
                    buffer_size = 1_000_000;
                    lob_prefetch = 1_000_000;
                }
                _ => {}
            }

            buf.write_u8(ora_type as u8)?;
            buf.write_u8(bind_flags::USE_INDICATORS)?;
            buf.write_u8(0)?; // precision
            buf.write_u8(0)?; // scale
            buf.write_ub4(buffer_size)?;
            buf.write_ub4(0)?; // max array elements
            buf.write_ub8(cont_flag)?;
            buf.write_ub4(0)?; // oid
            buf.write_ub2(0)?; // version
            buf.write_ub2(if col.charset_form != 0 { charset::UTF8 } else { 0 })?;
            buf.write_u8(col.charset_form)?;
            buf.write_ub4(lob_prefetch)?;
            if caps.ttc_field_version >= ccap_value::FIELD_VERSION_12_2 {
                buf.write_ub4(0)?;
            }
        }
        Ok(())
    }

    fn write_bind_metadata(&self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        for var in &self.bind_vars {
            let ora_type = var.ora_type();
            let charset_form = if ora_type.is_character() {
                csfrm::IMPLICIT
            } else {
                0
            };
            let cont_flag = if ora_type.is_lob() {
                lob_locator::PREFETCH_FLAG
            } else {
                0
            };
            let buffer_size = match ora_type {
                OraType::Number | OraType::BinaryInteger => 22,
                OraType::Date => 7,
                OraType::Timestamp => 11,
                OraType::TimestampTz | OraType::TimestampLtz => 13,
                OraType::BinaryDouble => 8,
                OraType::BinaryFloat => 4,
                OraType::Boolean => 4,
                OraType::Clob | OraType::Blob => lob_locator::BIND_BUFFER_SIZE,
                _ => var.size().max(1),
            };
            let mut flag = bind_flags::USE_INDICATORS;
            if var.is_array() {
                flag |= bind_flags::ARRAY;
            }

            buf.write_u8(ora_type as u8)?;
            buf.write_u8(flag)?;
            buf.write_u8(0)?; // precision
            buf.write_u8(0)?; // scale
            buf.write_ub4(buffer_size)?;
            buf.write_ub4(if var.is_array() {
                var.array_size() as u32
            } else {
                0
            })?;
            buf.write_ub8(cont_flag)?;
            buf.write_ub4(0)?; // oid
            buf.write_ub2(0)?; // version
            buf.write_ub2(if charset_form != 0 { charset::UTF8 } else { 0 })?;
            buf.write_u8(charset_form)?;
            buf.write_ub4(0)?; // LOB prefetch length
            if caps.ttc_field_version >= ccap_value::FIELD_VERSION_12_2 {
                buf.write_ub4(0)?; // oaccolid
            }
        }
        Ok(())
    }

    fn write_bind_rows(&self, buf: &mut WriteBuffer) -> Result<()> {
        for row in &self.bind_rows {
            buf.write_u8(MessageType::RowData as u8)?;
            for (value, var) in row.iter().zip(self.bind_vars.iter()) {
                if var.direction() == BindDirection::Output {
                    // Pure OUT binds send a NULL placeholder.
                    buf.write_u8(0)?;
                } else {
                    write_bind_value(buf, value)?;
                }
            }
        }
        Ok(())
    }

    fn out_bind_indices(&self) -> Vec<usize> {
        self.bind_vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.direction().is_output())
            .map(|(i, _)| i)
            .collect()
    }

    /// Directions of every bind, for the pipeline OUT-bind refusal.
    pub(crate) fn bind_directions(&self) -> Vec<BindDirection> {
        self.bind_vars.iter().map(|v| v.direction()).collect()
    }
}

impl TtcMessage for ExecuteCall {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        let function = self.function_code();
        write_function_header(buf, function, self.sequence, caps)?;
        match function {
            FunctionCode::Execute => self.write_execute(buf, caps),
            _ => self.write_reexecute(buf, caps),
        }
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
                self.outcome.columns = Some(columns);
                Ok(())
            }
            MessageType::RowHeader => self.reader.read_row_header(buf),
            MessageType::BitVector => self.reader.read_bit_vector(buf),
            MessageType::RowData => {
                if self.statement.is_returning() {
                    // One value array per OUT bind for this iteration.
                    let out_indices = self.out_bind_indices();
                    if self.outcome.returning_values.is_empty() {
                        self.outcome.returning_values =
                            vec![Vec::new(); out_indices.len()];
                    }
                    for (slot, &bind_idx) in out_indices.iter().enumerate() {
                        let var = &self.bind_vars[bind_idx];
                        let count = buf.read_ub4()? as usize;
                        let col = bind_column_shape(var);
                        let mut values = Vec::with_capacity(count);
                        for _ in 0..count {
                            values.push(decode_column(
                                buf,
                                &col,
                                caps,
                                self.options.number_shape,
                            )?);
                        }
                        self.outcome.returning_values[slot].push(values);
                    }
                    Ok(())
                } else if self.statement.is_plsql() {
                    let out_indices = self.out_bind_indices();
                    let mut values = Vec::with_capacity(out_indices.len());
                    for &bind_idx in &out_indices {
                        let var = &self.bind_vars[bind_idx];
                        let col = bind_column_shape(var);
                        values.push(decode_column(buf, &col, caps, self.options.number_shape)?);
                    }
                    self.outcome.out_values.push(values);
                    Ok(())
                } else {
                    let row = self.reader.read_row(buf, caps)?;
                    self.outcome.rows.push(row);
                    self.outcome.more_rows = true;
                    Ok(())
                }
            }
            MessageType::IoVector => {
                buf.skip(1)?; // flags
                let num_requests = buf.read_ub2()? as usize;
                buf.skip_ub()?; // iteration number
                buf.skip_ub()?; // iterations this round
                buf.skip_ub()?; // uac buffer length
                let mut binds = self.statement.binds().to_vec();
                for i in 0..num_requests {
                    let direction = buf.read_u8()?;
                    if let (Some(info), Some(dir)) =
                        (binds.get_mut(i), BindDirection::from_wire(direction))
                    {
                        info.direction = dir;
                    }
                    if let (Some(var), Some(dir)) = (
                        self.bind_vars.get_mut(i),
                        BindDirection::from_wire(direction),
                    ) {
                        var.set_direction(dir);
                    }
                }
                self.statement.set_binds(binds);
                Ok(())
            }
            MessageType::ImplicitResultset => {
                let count = buf.read_ub4()?;
                for _ in 0..count {
                    let skip = buf.read_u8()? as usize;
                    buf.skip(skip)?;
                    let cursor_id = buf.read_ub2()?;
                    self.outcome.implicit_cursors.push(cursor_id);
                }
                Ok(())
            }
            MessageType::Parameter => {
                // DML row counts arrive as a parameter block.
                if self.options.dml_row_counts {
                    let count = buf.read_ub4()? as usize;
                    for _ in 0..count {
                        self.outcome.dml_row_counts.push(buf.read_ub8()?);
                    }
                    Ok(())
                } else {
                    // Key/value session parameters: consumed and dropped.
                    let pairs = buf.read_ub2()?;
                    for _ in 0..pairs {
                        buf.skip_ub()?;
                        buf.skip_bytes_with_length()?;
                        let value_len = buf.read_ub4()?;
                        if value_len > 0 {
                            buf.skip_bytes_with_length()?;
                        }
                        buf.skip_ub()?;
                    }
                    Ok(())
                }
            }
            other => Err(Error::Protocol(format!(
                "unexpected message {other:?} in execute response"
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

/// Column-shaped view of a bind variable, for decoding OUT values.
fn bind_column_shape(var: &Variable) -> ColumnInfo {
    let mut col = ColumnInfo::new("", var.ora_type());
    col.buffer_size = var.size();
    col.max_size = var.size();
    col
}

/// Serialize one bind value in wire form.
pub(crate) fn write_bind_value(buf: &mut WriteBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.write_u8(0),
        Value::Integer(v) => {
            let encoded = encode_number(&v.to_string())?;
            buf.write_bytes_with_length(Some(&encoded))
        }
        Value::Number(n) => {
            let encoded = encode_number(n.as_str())?;
            buf.write_bytes_with_length(Some(&encoded))
        }
        Value::Float(v) => {
            let encoded = encode_binary_double(*v);
            buf.write_bytes_with_length(Some(&encoded))
        }
        Value::String(s) if s.is_empty() => buf.write_u8(0),
        Value::String(s) => buf.write_bytes_with_length(Some(s.as_bytes())),
        Value::Bytes(b) if b.is_empty() => buf.write_u8(0),
        Value::Bytes(b) => buf.write_bytes_with_length(Some(b)),
        Value::Boolean(true) => buf.write_bytes_with_length(Some(&[1, 1])),
        Value::Boolean(false) => buf.write_bytes_with_length(Some(&[0])),
        Value::DateTime(dt) if dt.has_tz => {
            buf.write_bytes_with_length(Some(&encode_timestamp(dt, true)))
        }
        Value::DateTime(dt) if dt.nanosecond > 0 => {
            buf.write_bytes_with_length(Some(&encode_timestamp(dt, false)))
        }
        Value::DateTime(dt) => buf.write_bytes_with_length(Some(&encode_date(dt))),
        Value::IntervalDs(days, seconds, nanos) => {
            let mut raw = Vec::with_capacity(11);
            raw.extend_from_slice(&((*days as i64 + 0x8000_0000) as u32).to_be_bytes());
            raw.push((seconds / 3600 + 60) as u8);
            raw.push((seconds % 3600 / 60 + 60) as u8);
            raw.push((seconds % 60 + 60) as u8);
            raw.extend_from_slice(&((*nanos as i64 + 0x8000_0000) as u32).to_be_bytes());
            buf.write_bytes_with_length(Some(&raw))
        }
        Value::IntervalYm(months) => {
            let mut raw = Vec::with_capacity(5);
            raw.extend_from_slice(&((months / 12 + 0x8000_0000) as u32).to_be_bytes());
            raw.push((months % 12 + 60) as u8);
            buf.write_bytes_with_length(Some(&raw))
        }
        Value::RowId(rowid) => match rowid.display() {
            Some(text) => buf.write_bytes_with_length(Some(text.as_bytes())),
            None => buf.write_u8(0),
        },
        Value::Lob(locator) => {
            buf.write_ub4(locator.as_bytes().len() as u32)?;
            buf.write_bytes_with_length(Some(locator.as_bytes()))
        }
        Value::Json(json) => {
            let encoded = encode_oson(json)?;
            buf.write_bytes_with_length(Some(&encoded))
        }
        Value::Vector(vector) => {
            let encoded = encode_vector(vector);
            buf.write_bytes_with_length(Some(&encoded))
        }
        Value::Cursor(_) => buf.write_u8(0),
        Value::Object(_) => Err(Error::NotSupported(
            "binding object values without a type descriptor".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PacketType;

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            prefetch_rows: 2,
            ..Default::default()
        }
    }

    fn body_of(call: &mut ExecuteCall, caps: &Capabilities) -> Vec<u8> {
        let mut buf = WriteBuffer::new(32768, true);
        buf.start_request(PacketType::Data, 0);
        call.write(&mut buf, caps).unwrap();
        let packets = buf.end_request_raw();
        packets[0][10..].to_vec()
    }

    #[test]
    fn first_execution_parses() {
        let caps = Capabilities::new();
        let stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        let mut call = ExecuteCall::new(stmt, options(), vec![], vec![], 3);
        let body = body_of(&mut call, &caps);

        assert_eq!(body[0], MessageType::Function as u8);
        assert_eq!(body[1], FunctionCode::Execute as u8);
        assert_eq!(body[2], 3);
        assert!(String::from_utf8_lossy(&body).contains("SELECT 1 FROM DUAL"));
    }

    #[test]
    fn cached_query_reexecutes_and_fetches() {
        let caps = Capabilities::new();
        let mut stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        stmt.set_cursor_id(42);
        stmt.set_executed(true);
        stmt.set_columns(vec![ColumnInfo::new("1", OraType::Number)]);
        let mut call = ExecuteCall::new(stmt, options(), vec![], vec![], 4);
        let body = body_of(&mut call, &caps);
        assert_eq!(body[1], FunctionCode::ReexecuteAndFetch as u8);
        assert!(!String::from_utf8_lossy(&body).contains("SELECT"));
    }

    #[test]
    fn batch_errors_force_full_execute() {
        let caps = Capabilities::new();
        let mut stmt = Statement::parse("INSERT INTO t VALUES (:1)").unwrap();
        stmt.set_cursor_id(42);
        stmt.set_executed(true);
        let opts = ExecuteOptions {
            batch_errors: true,
            num_iters: 3,
            ..Default::default()
        };
        let mut call = ExecuteCall::new(stmt, opts, vec![], vec![], 5);
        let body = body_of(&mut call, &caps);
        assert_eq!(body[1], FunctionCode::Execute as u8);
    }

    #[test]
    fn bind_rows_carry_row_data_markers() {
        let caps = Capabilities::new();
        let stmt = Statement::parse("INSERT INTO t VALUES (:1)").unwrap();
        let rows = vec![vec![Value::Integer(1)], vec![Value::Integer(2)]];
        let vars = vec![Variable::new(OraType::Number, 22, 2)];
        let opts = ExecuteOptions {
            num_iters: 2,
            ..Default::default()
        };
        let mut call = ExecuteCall::new(stmt, opts, vars, rows, 6);
        let body = body_of(&mut call, &caps);
        let markers = body
            .iter()
            .filter(|&&b| b == MessageType::RowData as u8)
            .count();
        assert!(markers >= 2, "expected a RowData marker per iteration");
    }

    #[test]
    fn row_stream_decodes_with_bit_vector() {
        let caps = Capabilities::new();
        let mut reader = RowReader::default();
        reader.set_columns(vec![
            ColumnInfo::new("A", OraType::Varchar),
            ColumnInfo::new("B", OraType::Varchar),
        ]);

        // First row: both values fresh.
        let mut buf = ReadBuffer::from_slice(&[1, b'x', 1, b'y']);
        let row = reader.read_row(&mut buf, &caps).unwrap();
        assert_eq!(row.get(0).unwrap().as_str(), Some("x"));

        // Second row: only column B fresh (bit 1 set), A duplicated.
        let mut buf = ReadBuffer::from_slice(&[0b0000_0010]);
        reader.read_bit_vector(&mut buf).unwrap();
        let mut buf = ReadBuffer::from_slice(&[1, b'z']);
        let row = reader.read_row(&mut buf, &caps).unwrap();
        assert_eq!(row.get(0).unwrap().as_str(), Some("x"));
        assert_eq!(row.get(1).unwrap().as_str(), Some("z"));
    }

    #[test]
    fn bind_value_encodings() {
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        write_bind_value(&mut buf, &Value::Null).unwrap();
        write_bind_value(&mut buf, &Value::Boolean(true)).unwrap();
        write_bind_value(&mut buf, &Value::Boolean(false)).unwrap();
        write_bind_value(&mut buf, &Value::from("ab")).unwrap();
        let packets = buf.end_request_raw();
        let body = &packets[0][10..];
        assert_eq!(body, &[0, 2, 1, 1, 1, 0, 2, b'a', b'b']);
    }

    #[test]
    fn finish_applies_cursor_and_rowcount() {
        let stmt = Statement::parse("INSERT INTO t VALUES (1)").unwrap();
        let mut call = ExecuteCall::new(stmt, ExecuteOptions::default(), vec![], vec![], 1);
        call.state.error_info.cursor_id = 99;
        call.state.error_info.row_count = 1;
        let (stmt, outcome) = call.finish();
        assert_eq!(stmt.cursor_id(), 99);
        assert!(stmt.executed());
        assert_eq!(outcome.row_count, 1);
    }

    #[test]
    fn implicit_results_collected() {
        let caps = Capabilities::new();
        let stmt = Statement::parse("BEGIN NULL; END").unwrap();
        let mut call = ExecuteCall::new(stmt, ExecuteOptions::default(), vec![], vec![], 1);

        let mut wb = WriteBuffer::new(8192, true);
        wb.start_request(PacketType::Data, 0);
        wb.write_ub4(1).unwrap(); // one implicit result
        wb.write_u8(0).unwrap(); // no extra bytes
        wb.write_ub2(321).unwrap(); // cursor id
        let packets = wb.end_request_raw();
        let mut buf = ReadBuffer::from_bytes(packets[0].slice(10..));
        call.process(MessageType::ImplicitResultset, &mut buf, &caps)
            .unwrap();
        assert_eq!(call.outcome.implicit_cursors, vec![321]);
    }
}
