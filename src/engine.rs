//! The per-connection protocol engine.
//!
//! Owns the transport and drives the connect state machine:
//!
//! ```text
//! NEW → TCP_CONNECTED → ACCEPTED → AUTHENTICATED → READY ⇄ IN_CALL
//!                                               ↘ BREAK_PENDING ↗
//!                                                   CLOSING → CLOSED
//! ```
//!
//! Phase one tolerates `retry_count` REFUSEs, replays the CONNECT against
//! REDIRECT targets, and honors server-requested TLS renegotiation.
//! `process_message` serializes a codec, pumps response packets into the
//! resumable decoder, and interprets the codec's retry/resend flags as
//! state machine transitions. Exactly one message is in flight per
//! connection; the owner serializes access through a mutex.
//!
//! Cancellation: `BreakSignal` may be flagged from any task. The engine
//! observes it between packet reads, emits a BREAK marker, drains to the
//! server's RESET acknowledgement and surfaces `CallCancelled`. Call
//! timeouts follow the same recovery; a second timeout inside recovery
//! force-closes the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::config::{Description, Protocol};
use crate::constants::{data_flags, ora, MarkerType, PacketType, version};
use crate::error::{Error, Result};
use crate::messages::{
    process_one_message, write_close_cursors_piggyback, AcceptInfo, ConnectRequest, RedirectInfo,
    RefuseInfo, TtcMessage,
};
use crate::packet::{build_marker, build_packet, Packet};
use crate::transport::Transport;

/// Recovery deadline while draining to a RESET acknowledgement.
const RESET_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cooperative cancellation flag shared with [`ProtocolEngine`].
#[derive(Debug, Default)]
pub struct BreakSignal {
    requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl BreakSignal {
    /// Request cancellation of the in-flight call. Idempotent and safe
    /// from any task.
    pub fn raise(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    fn is_raised(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Phase one completed, phase two pending
    Accepted,
    /// Authentication completed
    Authenticated,
    /// Idle, ready for a message
    Ready,
    /// A message is in flight
    InCall,
    /// A break was issued, awaiting the RESET echo
    BreakPending,
    /// Force-closed or logged off
    Closed,
}

/// The protocol engine for one connection.
#[derive(Debug)]
pub struct ProtocolEngine {
    transport: Transport,
    /// Negotiated capabilities, frozen after phase two
    pub caps: Capabilities,
    state: ConnState,
    sequence: u8,
    cursors_to_close: Vec<u16>,
    break_signal: Arc<BreakSignal>,
    call_timeout: Option<Duration>,
    last_request: Vec<Bytes>,
}

impl ProtocolEngine {
    /// Run phase one against a description: dial, optional TLS, CONNECT,
    /// and the ACCEPT / REFUSE-retry / REDIRECT dance.
    pub async fn connect(
        description: &Description,
        program: &str,
        disable_oob: bool,
    ) -> Result<(Self, AcceptInfo)> {
        let mut current = description.clone();
        let mut is_redirect = false;
        let mut refusals_left = description.retry_count;
        let enable_oob = !disable_oob;

        'reconnect: loop {
            let mut transport = dial_description(&current).await?;

            let request = {
                let mut r = ConnectRequest::new(&current, program, enable_oob);
                r.is_redirect = is_redirect;
                r
            };
            let (connect_packet, continuation) = request.build()?;
            transport.send_packet(connect_packet.clone()).await?;
            if let Some(data) = &continuation {
                transport.send_packet(data.clone()).await?;
            }

            loop {
                let packet = transport.receive_packet().await?;
                match packet.packet_type() {
                    PacketType::Resend => {
                        transport.send_packet(connect_packet.clone()).await?;
                        if let Some(data) = &continuation {
                            transport.send_packet(data.clone()).await?;
                        }
                    }
                    PacketType::Accept => {
                        let accept = AcceptInfo::parse(&packet)?;
                        if accept.wants_tls_reneg {
                            let addr = current.primary_address();
                            let tls = current.tls.clone().unwrap_or_default();
                            transport.renegotiate_tls(&addr.host, &tls).await?;
                        }
                        transport.set_large_sdu(accept.uses_large_sdu());
                        transport.set_sdu(accept.sdu.max(512));

                        let mut caps = Capabilities::new();
                        caps.apply_accept(
                            accept.protocol_version,
                            accept.service_options,
                            accept.sdu,
                            accept.flags2,
                        );
                        caps.hardware_byte_order = accept.hardware_byte_order;
                        // Urgent delivery is unavailable here; the probe is
                        // only sent where the server can tolerate it.
                        let oob_usable = enable_oob
                            && accept.supports_oob()
                            && accept.protocol_version >= version::MIN_OOB_CHECK
                            && current.primary_address().protocol == Protocol::Tcp;
                        if oob_usable {
                            send_oob_probe(&mut transport).await?;
                        }
                        caps.supports_oob = oob_usable;

                        tracing::debug!(
                            protocol_version = accept.protocol_version,
                            sdu = accept.sdu,
                            "connection accepted"
                        );
                        let engine = Self {
                            transport,
                            caps,
                            state: ConnState::Accepted,
                            sequence: 0,
                            cursors_to_close: Vec::new(),
                            break_signal: Arc::new(BreakSignal::default()),
                            call_timeout: None,
                            last_request: Vec::new(),
                        };
                        return Ok((engine, accept));
                    }
                    PacketType::Refuse => {
                        let refuse = RefuseInfo::parse(&packet)?;
                        if refusals_left > 0 {
                            refusals_left -= 1;
                            tracing::debug!(
                                remaining = refusals_left,
                                "listener refused, retrying"
                            );
                            tokio::time::sleep(current.retry_delay).await;
                            continue 'reconnect;
                        }
                        return Err(refuse.into_error());
                    }
                    PacketType::Redirect => {
                        let redirect = RedirectInfo::parse(&packet)?;
                        tracing::debug!(host = %redirect.host, port = redirect.port, "redirected");
                        current = current.redirected_to(&redirect.host, redirect.port);
                        is_redirect = true;
                        continue 'reconnect;
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected {other:?} packet during connect"
                        )))
                    }
                }
            }
        }
    }

    /// Handle for external cancellation.
    pub fn break_signal(&self) -> Arc<BreakSignal> {
        Arc::clone(&self.break_signal)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Mark phase two complete.
    pub fn set_authenticated(&mut self) {
        self.state = ConnState::Ready;
    }

    /// Per-call deadline; None disables it.
    pub fn set_call_timeout(&mut self, timeout: Option<Duration>) {
        self.call_timeout = timeout;
    }

    /// The next TTC sequence number (wraps to 1).
    pub fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        self.sequence
    }

    /// Queue cursor ids for a piggybacked server-side close.
    pub fn schedule_cursor_close(&mut self, cursors: impl IntoIterator<Item = u16>) {
        self.cursors_to_close.extend(cursors);
    }

    /// True while the socket is attached.
    pub fn is_connected(&self) -> bool {
        self.state != ConnState::Closed && self.transport.is_connected()
    }

    /// Drop the socket without ceremony, e.g. after a session-dead error.
    pub fn force_close(&mut self) {
        self.transport.abort();
        self.state = ConnState::Closed;
        tracing::debug!("connection force-closed");
    }

    /// Orderly close: logoff, the EOF data packet, then disconnect.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        if self.state == ConnState::Ready {
            let seq = self.next_sequence();
            let mut logoff = crate::messages::LogoffCall::new(seq);
            let _ = self.process_message(&mut logoff).await;
            let eof = build_packet(
                PacketType::Data,
                0,
                &data_flags::EOF.to_be_bytes(),
                self.transport.large_sdu(),
            );
            let _ = self.transport.send_packet(eof).await;
        }
        self.transport.disconnect().await;
        self.state = ConnState::Closed;
    }

    /// Run one message to completion. Total over the state machine: the
    /// engine returns with the connection in READY or CLOSED, never
    /// IN_CALL.
    pub async fn process_message(&mut self, msg: &mut dyn TtcMessage) -> Result<()> {
        if self.state == ConnState::Closed {
            return Err(Error::ConnectionClosed);
        }

        let mut reparse_attempted = false;
        loop {
            msg.state().begin_round_trip();

            let result = self.round_trip(msg).await;
            match result {
                Ok(()) => {
                    if msg.state().resend {
                        continue;
                    }
                    if let Some(error) = self.interpret_server_error(msg, &mut reparse_attempted) {
                        match error {
                            Ok(()) => continue, // retry after reparse
                            Err(e) => {
                                self.settle_after_error(&e);
                                return Err(e);
                            }
                        }
                    }
                    self.state = ConnState::Ready;
                    return Ok(());
                }
                Err(e @ (Error::CallCancelled | Error::CallTimeout(_))) => {
                    // Recovery already ran inside the receive loop.
                    return Err(e);
                }
                Err(e) => {
                    if e.is_session_dead() || self.state == ConnState::Closed {
                        self.force_close();
                    } else if self.state == ConnState::InCall {
                        // A request hit the wire: resynchronize before
                        // surfacing the failure.
                        if self.break_and_reset().await.is_err() {
                            self.force_close();
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Serialize, send, then decode the full response stream.
    async fn round_trip(&mut self, msg: &mut dyn TtcMessage) -> Result<()> {
        let mut wbuf = WriteBuffer::new(self.transport.sdu(), self.transport.large_sdu());
        wbuf.start_request(PacketType::Data, 0);
        if self.state == ConnState::Ready && !self.cursors_to_close.is_empty() {
            let cursors = std::mem::take(&mut self.cursors_to_close);
            let seq = self.next_sequence();
            write_close_cursors_piggyback(&mut wbuf, &cursors, seq, &self.caps)?;
            tracing::trace!(count = cursors.len(), "piggybacked cursor close");
        }
        msg.write(&mut wbuf, &self.caps)?;
        let packets = wbuf.end_request(&self.caps)?;

        self.transport.send_packets(&packets).await?;
        self.last_request = packets;
        self.state = ConnState::InCall;

        let mut rbuf = ReadBuffer::new();
        loop {
            if msg.state_ref().end_of_response {
                if msg.state_ref().flush_out_binds {
                    // The server withheld OUT binds; ask for them and keep
                    // decoding.
                    self.send_flush_out_binds().await?;
                    let state = msg.state();
                    state.flush_out_binds = false;
                    state.end_of_response = false;
                    continue;
                }
                return Ok(());
            }

            let save = rbuf.save();
            match process_one_message(msg, &mut rbuf, &self.caps) {
                Ok(()) => {}
                Err(Error::OutOfPackets) => {
                    rbuf.restore(save);
                    self.receive_into(&mut rbuf).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive the next packet into the decode buffer, honoring breaks,
    /// timeouts and transport-level control packets.
    async fn receive_into(&mut self, rbuf: &mut ReadBuffer) -> Result<()> {
        loop {
            if self.break_signal.is_raised() {
                self.break_signal.take();
                self.break_and_reset().await?;
                return Err(Error::CallCancelled);
            }

            let packet = self.receive_with_interrupts().await?;
            match packet.packet_type() {
                PacketType::Data => {
                    rbuf.push_segment(packet.message_body());
                    return Ok(());
                }
                PacketType::Marker => match packet.marker_type() {
                    Some(MarkerType::Break) => {
                        // Server-initiated break: acknowledge and surface
                        // the error that follows.
                        self.state = ConnState::BreakPending;
                        self.drain_to_reset().await?;
                        return Err(Error::CallCancelled);
                    }
                    _ => continue,
                },
                PacketType::Resend => {
                    let packets = self.last_request.clone();
                    self.transport.send_packets(&packets).await?;
                }
                PacketType::Control => continue,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {other:?} packet mid-call"
                    )))
                }
            }
        }
    }

    /// One packet read, racing the break signal and the call timeout.
    async fn receive_with_interrupts(&mut self) -> Result<Packet> {
        let deadline = self.call_timeout;
        let signal = Arc::clone(&self.break_signal);

        let receive = async {
            tokio::select! {
                packet = self.transport.receive_packet() => packet.map(Some),
                _ = signal.notify.notified() => Ok(None),
            }
        };

        let outcome = match deadline {
            Some(limit) => match timeout(limit, receive).await {
                Ok(r) => r,
                Err(_) => {
                    tracing::debug!(?limit, "call timeout, breaking");
                    self.break_and_reset().await.map_err(|_| {
                        self.force_close();
                        Error::CallTimeout(limit)
                    })?;
                    return Err(Error::CallTimeout(limit));
                }
            },
            None => receive.await,
        };

        match outcome? {
            Some(packet) => Ok(packet),
            None => {
                // Break raised while waiting.
                self.break_signal.take();
                self.break_and_reset().await?;
                Err(Error::CallCancelled)
            }
        }
    }

    /// BREAK → drain to RESET → discard the trailing error packet. Leaves
    /// the connection READY; a failure here is unrecoverable and the
    /// caller force-closes.
    async fn break_and_reset(&mut self) -> Result<()> {
        self.state = ConnState::BreakPending;
        // The break marker is built standalone so an in-progress request
        // buffer is never interleaved.
        let marker = build_marker(MarkerType::Break, self.transport.large_sdu());
        self.transport.send_packet(marker).await?;
        self.drain_to_reset().await
    }

    async fn drain_to_reset(&mut self) -> Result<()> {
        let reset = build_marker(MarkerType::Reset, self.transport.large_sdu());
        self.transport.send_packet(reset).await?;

        let drain = async {
            // Wait for the reset echo; some servers emit several markers.
            loop {
                let packet = self.transport.receive_packet().await?;
                if packet.marker_type() == Some(MarkerType::Reset) {
                    break;
                }
                if !packet.is_marker() {
                    // Late data from the broken call; keep draining.
                    continue;
                }
            }
            // The interrupted call's error block follows; consume it.
            loop {
                let packet = self.transport.receive_packet().await?;
                if packet.is_data() {
                    return Ok::<_, Error>(());
                }
            }
        };

        match timeout(RESET_DRAIN_TIMEOUT, drain).await {
            Ok(Ok(())) => {
                self.state = ConnState::Ready;
                tracing::trace!("break recovery complete");
                Ok(())
            }
            Ok(Err(e)) => {
                self.force_close();
                Err(e)
            }
            Err(_) => {
                // Second timeout while recovering.
                self.force_close();
                Err(Error::ConnectionClosed)
            }
        }
    }

    async fn send_flush_out_binds(&mut self) -> Result<()> {
        let mut wbuf = WriteBuffer::new(self.transport.sdu(), self.transport.large_sdu());
        wbuf.start_request(PacketType::Data, 0);
        wbuf.write_u8(crate::constants::MessageType::FlushOutBinds as u8)?;
        let packets = wbuf.end_request(&self.caps)?;
        self.transport.send_packets(&packets).await
    }

    /// Interpret the error block after a completed stream. `Some(Ok(()))`
    /// means retry the message; `Some(Err(_))` surfaces; `None` is
    /// success.
    fn interpret_server_error(
        &mut self,
        msg: &mut dyn TtcMessage,
        reparse_attempted: &mut bool,
    ) -> Option<std::result::Result<(), Error>> {
        let code = msg.state_ref().error_info.code;
        if code == 0 {
            return None;
        }
        // Row exhaustion and collected batch errors are results, not
        // failures.
        if code == ora::NO_DATA_FOUND || code == ora::ARRAY_DML_ERRORS {
            return None;
        }
        let error = msg.state_ref().server_error()?;

        if error.requires_reparse() && !*reparse_attempted {
            *reparse_attempted = true;
            msg.state().retry = true;
            tracing::debug!(code, "cursor invalidated, retrying with reparse");
            return Some(Ok(()));
        }
        Some(Err(error))
    }

    fn settle_after_error(&mut self, error: &Error) {
        if error.is_session_dead() {
            self.force_close();
        } else {
            self.state = ConnState::Ready;
        }
    }
}

async fn dial_description(description: &Description) -> Result<Transport> {
    let mut last_error = None;
    for group in &description.address_lists {
        for address in &group.addresses {
            let proxy = address
                .proxy
                .as_ref()
                .map(|(host, port)| (host.as_str(), *port));
            match Transport::connect(
                &address.host,
                address.port,
                proxy,
                description.tcp_connect_timeout,
            )
            .await
            {
                Ok(mut transport) => {
                    if address.protocol == Protocol::Tcps {
                        let tls = description.tls.clone().unwrap_or_default();
                        transport.wrap_tls(&address.host, &tls).await?;
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    tracing::debug!(host = %address.host, port = address.port, error = %e, "dial failed");
                    last_error = Some(e);
                    if !group.failover {
                        break;
                    }
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Interface("description has no addresses".into())))
}

/// The phase-one OOB probe: the urgent byte followed by a reset marker.
async fn send_oob_probe(transport: &mut Transport) -> Result<()> {
    transport.send_oob_probe().await?;
    let marker = build_marker(MarkerType::Reset, transport.large_sdu());
    transport.send_packet(marker).await?;
    // The server acknowledges with a marker; tolerate servers that skip it.
    match timeout(Duration::from_secs(2), transport.receive_packet()).await {
        Ok(Ok(packet)) if packet.is_marker() => Ok(()),
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_signal_idempotent() {
        let signal = BreakSignal::default();
        assert!(!signal.is_raised());
        signal.raise();
        signal.raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.is_raised());
        assert!(!signal.take());
    }

    #[tokio::test]
    async fn connect_accepts_and_seeds_caps() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Read the CONNECT packet header to size the read.
            let mut header = [0u8; 8];
            sock.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes([header[0], header[1]]) as usize;
            let mut rest = vec![0u8; len - 8];
            sock.read_exact(&mut rest).await.unwrap();

            // Respond with a modern ACCEPT (no OOB so no probe follows).
            let payload = [
                0x01, 0x3F, // version 319
                0x00, 0x01, // service options
                0x20, 0x00, 0xFF, 0xFF, // sdu16/tdu16
                0x00, 0x00, // byte order
                0x00, 0x00, 0x00, 0x00, // data len/offset
                0x04, 0x04, // flags
                0, 0, 0, 0, 0, 0, 0, 0, // reserved
                0x00, 0x00, 0x40, 0x00, // sdu32 = 16384
                0, 0, 0, 0, 0, // reserved
                0x00, 0x00, 0x00, 0x00, // flags2
            ];
            let accept = build_packet(PacketType::Accept, 0, &payload, false);
            sock.write_all(&accept).await.unwrap();
        });

        let description: Description = format!("{}:{}/SVC", addr.ip(), addr.port())
            .parse()
            .unwrap();
        let (engine, accept) = ProtocolEngine::connect(&description, "test", true)
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(accept.protocol_version, 319);
        assert_eq!(engine.caps.sdu, 16384);
        assert_eq!(engine.state(), ConnState::Accepted);
        assert!(engine.caps.uses_large_sdu());
    }

    #[tokio::test]
    async fn refuse_exhausts_retries() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let mut header = [0u8; 8];
                if sock.read_exact(&mut header).await.is_err() {
                    continue;
                }
                let len = u16::from_be_bytes([header[0], header[1]]) as usize;
                let mut rest = vec![0u8; len.saturating_sub(8)];
                let _ = sock.read_exact(&mut rest).await;

                let text = b"(DESCRIPTION=(ERR=12514))";
                let mut payload = vec![4u8, 4u8];
                payload.extend_from_slice(&(text.len() as u16).to_be_bytes());
                payload.extend_from_slice(text);
                let refuse = build_packet(PacketType::Refuse, 0, &payload, false);
                let _ = sock.write_all(&refuse).await;
            }
        });

        let mut description: Description = format!("{}:{}/SVC", addr.ip(), addr.port())
            .parse()
            .unwrap();
        description.retry_count = 1;
        description.retry_delay = Duration::from_millis(10);

        let result = ProtocolEngine::connect(&description, "test", true).await;
        match result {
            Err(Error::Refused(Some(err))) => assert_eq!(err.code, 12514),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_reconnects_to_new_target() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // Second listener: accepts the redirected connect.
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second_addr = second.local_addr().unwrap();
        let second_task = tokio::spawn(async move {
            let (mut sock, _) = second.accept().await.unwrap();
            let mut header = [0u8; 8];
            sock.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes([header[0], header[1]]) as usize;
            let mut rest = vec![0u8; len - 8];
            sock.read_exact(&mut rest).await.unwrap();
            // The replayed CONNECT carries the redirect flag.
            let flags = header[5];

            let payload = [
                0x01, 0x3F, 0x00, 0x01, 0x20, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x04, 0x04, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x00, 0x20, 0x00, 0, 0, 0, 0, 0,
                0x00, 0x00, 0x00, 0x00,
            ];
            let accept = build_packet(PacketType::Accept, 0, &payload, false);
            sock.write_all(&accept).await.unwrap();
            flags
        });

        // First listener: redirects to the second.
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let first_addr = first.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = first.accept().await.unwrap();
            let mut header = [0u8; 8];
            sock.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes([header[0], header[1]]) as usize;
            let mut rest = vec![0u8; len - 8];
            sock.read_exact(&mut rest).await.unwrap();

            let text = format!(
                "(DESCRIPTION=(ADDRESS=(HOST={})(PORT={}))(CONNECT_DATA=(SERVICE_NAME=SVC)))\0(original)",
                second_addr.ip(),
                second_addr.port()
            );
            let mut payload = Vec::new();
            payload.extend_from_slice(&(text.len() as u16).to_be_bytes());
            payload.extend_from_slice(text.as_bytes());
            let redirect = build_packet(PacketType::Redirect, 0, &payload, false);
            sock.write_all(&redirect).await.unwrap();
        });

        let description: Description = format!("{}:{}/SVC", first_addr.ip(), first_addr.port())
            .parse()
            .unwrap();
        let (engine, accept) = ProtocolEngine::connect(&description, "test", true)
            .await
            .unwrap();
        assert_eq!(accept.protocol_version, 319);
        assert_eq!(engine.state(), ConnState::Accepted);

        let replay_flags = second_task.await.unwrap();
        assert_eq!(
            replay_flags & crate::constants::packet_flags::REDIRECT,
            crate::constants::packet_flags::REDIRECT
        );
    }
}
