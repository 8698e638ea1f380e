//! Pipelined requests (function codes 199 and 200). Experimental.
//!
//! When the server advertises pipelining, several operations can be
//! appended to one outbound packet stream between a begin and an end
//! marker. The server executes them in order and returns each operation's
//! results tagged by position; an error in one operation is recorded
//! against that operation without aborting the rest. Requires explicit
//! end-of-request boundaries.
//!
//! Operations with OUT binds are refused here: the flush-out-binds path
//! does not compose with pipelining.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{data_flags, BindDirection, FunctionCode, MessageType};
use crate::error::{Error, Result};

use super::execute::{ExecuteCall, ExecuteOutcome};
use super::{write_function_header, MessageState, TtcMessage};

/// One operation inside a pipeline.
#[derive(Debug)]
pub struct PipelineOperation {
    call: ExecuteCall,
    done: bool,
}

impl PipelineOperation {
    /// Wrap an execute call for pipelined dispatch. Fails when the call
    /// carries OUT binds.
    pub fn new(call: ExecuteCall) -> Result<Self> {
        if call
            .bind_directions()
            .iter()
            .any(|d| d.is_output())
        {
            return Err(Error::NotSupported(
                "OUT binds inside a pipelined request".into(),
            ));
        }
        Ok(Self { call, done: false })
    }
}

/// Per-operation result of a pipeline round trip.
#[derive(Debug)]
pub struct PipelineResult {
    /// Position of the operation in submission order
    pub index: usize,
    /// The operation's outcome when it succeeded
    pub outcome: Option<ExecuteOutcome>,
    /// The operation's error when it failed
    pub error: Option<Error>,
}

/// The pipeline codec: begin marker, each operation's request, end marker.
#[derive(Debug)]
pub struct PipelineCall {
    state: MessageState,
    operations: Vec<PipelineOperation>,
    current: usize,
    sequence: u8,
}

impl PipelineCall {
    /// Build a pipeline over the given operations.
    pub fn new(operations: Vec<PipelineOperation>, sequence: u8) -> Self {
        Self {
            state: MessageState::default(),
            operations,
            current: 0,
            sequence,
        }
    }

    /// The data flags the engine sets on the first outbound packet.
    pub fn begin_flags() -> u16 {
        data_flags::BEGIN_PIPELINE
    }

    /// Collect per-operation results after the round trip.
    pub fn finish(self) -> Vec<PipelineResult> {
        self.operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| {
                let error = op.call.state_ref().server_error();
                let (_, outcome) = op.call.finish();
                match error {
                    Some(error) => PipelineResult {
                        index,
                        outcome: None,
                        error: Some(error),
                    },
                    None => PipelineResult {
                        index,
                        outcome: Some(outcome),
                        error: None,
                    },
                }
            })
            .collect()
    }
}

impl TtcMessage for PipelineCall {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        if !caps.supports_pipelining {
            return Err(Error::NotSupported(
                "server does not support pipelined requests".into(),
            ));
        }
        write_function_header(buf, FunctionCode::PipelineBegin, self.sequence, caps)?;
        buf.write_ub4(self.operations.len() as u32)?;

        for op in self.operations.iter_mut() {
            op.call.write(buf, caps)?;
        }

        write_function_header(buf, FunctionCode::PipelineEnd, self.sequence, caps)?;
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()> {
        // Results stream back in submission order. An error block for the
        // current operation is routed to it rather than the pipeline.
        let op = match self.operations.get_mut(self.current) {
            Some(op) => op,
            None => {
                return Err(Error::Protocol(
                    "pipeline response for an unknown operation".into(),
                ))
            }
        };
        match message_type {
            MessageType::Error => {
                super::parse_error_block(op.call.state(), buf, caps)?;
                op.done = true;
                self.current += 1;
                Ok(())
            }
            other => op.call.process(other, buf, caps),
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
    use crate::constants::{accept_flags, service_options};
    use crate::messages::ExecuteOptions;
    use crate::statement::Statement;
    use crate::variable::Variable;

    fn pipelined_caps() -> Capabilities {
        let mut caps = Capabilities::new();
        caps.apply_accept(
            319,
            service_options::CAN_RECV_ATTENTION,
            8192,
            accept_flags::HAS_END_OF_RESPONSE,
        );
        caps
    }

    fn exec_call(sql: &str) -> ExecuteCall {
        ExecuteCall::new(
            Statement::parse(sql).unwrap(),
            ExecuteOptions::default(),
            vec![],
            vec![],
            1,
        )
    }

    #[test]
    fn refuses_out_binds() {
        let mut var = Variable::new(crate::constants::OraType::Number, 22, 1);
        var.set_direction(BindDirection::Output);
        let call = ExecuteCall::new(
            Statement::parse("BEGIN :1 := 5; END").unwrap(),
            ExecuteOptions::default(),
            vec![var],
            vec![vec![crate::row::Value::Null]],
            1,
        );
        assert!(matches!(
            PipelineOperation::new(call),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn refuses_without_server_support() {
        let caps = Capabilities::new();
        let ops = vec![PipelineOperation::new(exec_call("SELECT 1 FROM DUAL")).unwrap()];
        let mut pipeline = PipelineCall::new(ops, 1);
        let mut buf = crate::buffer::WriteBuffer::new(8192, true);
        buf.start_request(crate::constants::PacketType::Data, 0);
        assert!(matches!(
            pipeline.write(&mut buf, &caps),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn serializes_begin_and_end_markers() {
        let caps = pipelined_caps();
        let ops = vec![
            PipelineOperation::new(exec_call("SELECT 1 FROM DUAL")).unwrap(),
            PipelineOperation::new(exec_call("SELECT 2 FROM DUAL")).unwrap(),
        ];
        let mut pipeline = PipelineCall::new(ops, 1);
        let mut buf = crate::buffer::WriteBuffer::new(65536, true);
        buf.start_request(crate::constants::PacketType::Data, 0);
        buf.set_data_flags(PipelineCall::begin_flags());
        pipeline.write(&mut buf, &caps).unwrap();
        let packets = buf.end_request_raw();
        let body = &packets[0][10..];
        assert_eq!(body[1], FunctionCode::PipelineBegin as u8);
        assert!(body.contains(&(FunctionCode::PipelineEnd as u8)));
    }

    #[test]
    fn per_operation_errors_do_not_abort() {
        let caps = pipelined_caps();
        let ops = vec![
            PipelineOperation::new(exec_call("SELECT 1 FROM DUAL")).unwrap(),
            PipelineOperation::new(exec_call("SELECT 2 FROM DUAL")).unwrap(),
        ];
        let mut pipeline = PipelineCall::new(ops, 1);
        // Route an error to operation 0; operation 1 must still be current
        // afterwards.
        pipeline.operations[0].call.state().error_info.code = 942;
        pipeline.operations[0].call.state().error_occurred = true;
        pipeline.current = 1;
        let results = pipeline.finish();
        assert!(results[0].error.is_some());
        assert!(results[1].error.is_none());
    }
}
