//! Function-code-only calls: commit, rollback, ping, logoff, session
//! release. Their responses are just the shared status/error stream.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{release_mode, FunctionCode, MessageType};
use crate::error::{Error, Result};

use super::{write_function_header, MessageState, TtcMessage};

macro_rules! plain_call {
    ($(#[$doc:meta])* $name:ident, $function:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            state: MessageState,
            sequence: u8,
        }

        impl $name {
            /// Build the call with the next sequence number.
            pub fn new(sequence: u8) -> Self {
                Self {
                    state: MessageState::default(),
                    sequence,
                }
            }
        }

        impl TtcMessage for $name {
            fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
                write_function_header(buf, $function, self.sequence, caps)
            }

            fn process(
                &mut self,
                message_type: MessageType,
                _buf: &mut ReadBuffer,
                _caps: &Capabilities,
            ) -> Result<()> {
                Err(Error::Protocol(format!(
                    "unexpected message {message_type:?} in {} response",
                    stringify!($name)
                )))
            }

            fn state(&mut self) -> &mut MessageState {
                &mut self.state
            }

            fn state_ref(&self) -> &MessageState {
                &self.state
            }
        }
    };
}

plain_call!(
    /// Commit the open transaction.
    CommitCall,
    FunctionCode::Commit
);
plain_call!(
    /// Roll the open transaction back.
    RollbackCall,
    FunctionCode::Rollback
);
plain_call!(
    /// Cheap liveness round trip.
    PingCall,
    FunctionCode::Ping
);
plain_call!(
    /// Log the session off before closing the socket.
    LogoffCall,
    FunctionCode::Logoff
);

/// Release a DRCP session back to the server pool. Standalone closes pass
/// the deauthenticate flag; pooled releases keep the session authenticated.
#[derive(Debug)]
pub struct SessionReleaseCall {
    state: MessageState,
    sequence: u8,
    deauthenticate: bool,
    tag: Option<String>,
}

impl SessionReleaseCall {
    /// Build the release call.
    pub fn new(sequence: u8, deauthenticate: bool, tag: Option<String>) -> Self {
        Self {
            state: MessageState::default(),
            sequence,
            deauthenticate,
            tag,
        }
    }
}

impl TtcMessage for SessionReleaseCall {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::SessionRelease, self.sequence, caps)?;
        let tag = self.tag.as_deref().unwrap_or("");
        if tag.is_empty() {
            buf.write_u8(0)?;
            buf.write_ub4(0)?;
        } else {
            buf.write_u8(1)?;
            buf.write_ub4(tag.len() as u32)?;
        }
        buf.write_ub4(if self.deauthenticate {
            release_mode::DEAUTHENTICATE
        } else {
            release_mode::NORMAL
        })?;
        if !tag.is_empty() {
            buf.write_bytes_with_length(Some(tag.as_bytes()))?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        _buf: &mut ReadBuffer,
        _caps: &Capabilities,
    ) -> Result<()> {
        Err(Error::Protocol(format!(
            "unexpected message {message_type:?} in session release response"
        )))
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

    fn body_of(msg: &mut dyn TtcMessage) -> Vec<u8> {
        let caps = Capabilities::new();
        let mut buf = WriteBuffer::new(8192, true);
        buf.start_request(PacketType::Data, 0);
        msg.write(&mut buf, &caps).unwrap();
        let packets = buf.end_request_raw();
        packets[0][10..].to_vec()
    }

    #[test]
    fn plain_calls_are_just_headers() {
        for (mut msg, code) in [
            (
                Box::new(CommitCall::new(3)) as Box<dyn TtcMessage>,
                FunctionCode::Commit,
            ),
            (Box::new(RollbackCall::new(4)), FunctionCode::Rollback),
            (Box::new(PingCall::new(5)), FunctionCode::Ping),
            (Box::new(LogoffCall::new(6)), FunctionCode::Logoff),
        ] {
            let body = body_of(msg.as_mut());
            assert_eq!(body[0], MessageType::Function as u8);
            assert_eq!(body[1], code as u8);
            assert_eq!(body.len(), 3);
        }
    }

    #[test]
    fn session_release_deauthenticate_flag() {
        let mut msg = SessionReleaseCall::new(7, true, None);
        let body = body_of(&mut msg);
        // header(3) + tag pointer + tag length ub4 + mode ub4
        assert_eq!(body[3], 0);
        assert_eq!(body[4], 0);
        assert_eq!(&body[5..], &[1, release_mode::DEAUTHENTICATE as u8]);
    }

    #[test]
    fn session_release_with_tag() {
        let mut msg = SessionReleaseCall::new(7, false, Some("batch".into()));
        let body = body_of(&mut msg);
        assert!(String::from_utf8_lossy(&body).contains("batch"));
        // NORMAL mode (ub4 zero form) rides just before the tag bytes.
        assert_eq!(body[body.len() - 7], 0);
    }
}
