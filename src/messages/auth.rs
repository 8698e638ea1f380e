//! O5LOGON authentication (function codes 118 and 115).
//!
//! Round one sends the username and client identity; the server answers
//! with its half of the session key, the verifier data and PBKDF2
//! iteration counts. Round two derives the combo key, encrypts the
//! password and the client key half, and sends them back. The codec flags
//! `resend` between rounds so the engine serializes the same message
//! again. Token authentication collapses to a single round carrying the
//! bearer token instead of a password.

use std::collections::HashMap;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::{Capabilities, DRIVER_NAME};
use crate::config::{ConnectParams, Purity};
use crate::constants::{auth_mode, FunctionCode, MessageType};
use crate::crypto::{
    aes192_decrypt, aes192_encrypt, aes256_decrypt, aes256_encrypt, combo_key_11g, combo_key_12c,
    password_hash_11g, password_hash_12c, password_key_12c, random_key_half, random_salt, Padding,
    VerifierKind,
};
use crate::error::{Error, Result};

use super::{write_function_header, MessageState, TtcMessage};

/// Client version word reported to the server (packed 23.x format).
const CLIENT_VERSION_WORD: &str = "386924544";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    One,
    Two,
    Done,
}

/// Session facts returned by a successful logon.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Session id (SID)
    pub session_id: u32,
    /// Serial number
    pub serial_number: u16,
    /// Server version number, packed
    pub version_number: u32,
    /// Globally unique database id
    pub db_id: Option<String>,
}

/// The authentication exchange.
pub struct AuthExchange {
    state: MessageState,
    round: Round,
    sequence: u8,
    username: String,
    password: Vec<u8>,
    token: Option<String>,
    mode_bits: u32,
    purity: Purity,
    connection_class: Option<String>,
    edition: Option<String>,
    verifier_wire_type: u32,
    server_pairs: HashMap<String, String>,
    client_session_key: Option<Vec<u8>>,
    combo_key: Option<Vec<u8>>,
    /// Filled once the exchange completes
    pub session: SessionInfo,
    program: String,
    machine: String,
    osuser: String,
    pid: String,
    terminal: String,
}

impl std::fmt::Debug for AuthExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthExchange")
            .field("round", &self.round)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Drop for AuthExchange {
    fn drop(&mut self) {
        self.password.fill(0);
    }
}

impl AuthExchange {
    /// Build the exchange from connection parameters.
    pub fn new(params: &ConnectParams) -> Self {
        let mut mode_bits = auth_mode::LOGON | params.mode.wire_bits();
        if params.token.is_some() {
            mode_bits |= auth_mode::IAM_TOKEN;
        }
        Self {
            state: MessageState::default(),
            round: Round::One,
            sequence: 1,
            username: params.username.to_uppercase(),
            password: params.password.as_bytes().to_vec(),
            token: params.token.clone(),
            mode_bits,
            purity: params.purity,
            connection_class: params.connection_class.clone(),
            edition: params.edition.clone(),
            verifier_wire_type: 0,
            server_pairs: HashMap::new(),
            client_session_key: None,
            combo_key: None,
            session: SessionInfo::default(),
            program: std::env::current_exe()
                .ok()
                .and_then(|p| p.file_name().map(|f| f.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "orathin".into()),
            machine: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".into()),
            osuser: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".into()),
            pid: std::process::id().to_string(),
            terminal: std::env::var("TERM").unwrap_or_else(|_| "unknown".into()),
        }
    }

    /// True once both rounds completed.
    pub fn is_complete(&self) -> bool {
        self.round == Round::Done
    }

    fn token_auth(&self) -> bool {
        self.token.is_some()
    }

    fn preliminary(&self) -> bool {
        self.mode_bits & auth_mode::PRELIM != 0
    }

    fn write_round_one(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::AuthPhaseOne, self.sequence, caps)?;
        let user = self.username.clone();
        self.write_preamble(buf, &user, self.mode_bits, 5)?;
        self.write_pair(buf, "AUTH_TERMINAL", &self.terminal, 0)?;
        self.write_pair(buf, "AUTH_PROGRAM_NM", &self.program, 0)?;
        self.write_pair(buf, "AUTH_MACHINE", &self.machine, 0)?;
        self.write_pair(buf, "AUTH_PID", &self.pid, 0)?;
        self.write_pair(buf, "AUTH_SID", &self.osuser, 0)?;
        Ok(())
    }

    fn write_round_two(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::AuthPhaseTwo, self.sequence, caps)?;

        let verifier = VerifierKind::from_wire(self.verifier_wire_type)?;
        let session_key_hex = {
            let key = self
                .client_session_key
                .as_ref()
                .ok_or_else(|| Error::Auth("client session key missing".into()))?;
            let hex = hex::encode_upper(key);
            let keep = if verifier == VerifierKind::V12c { 64 } else { 96 };
            hex[..keep.min(hex.len())].to_string()
        };
        let password_hex = self.encrypt_password(verifier)?;
        let speedy_hex = self.speedy_key(verifier)?;

        let mut num_pairs = 6u32;
        if speedy_hex.is_some() {
            num_pairs += 1;
        }
        if self.connection_class.is_some() {
            num_pairs += 1;
        }
        if self.purity != Purity::Default {
            num_pairs += 1;
        }
        if self.edition.is_some() {
            num_pairs += 1;
        }

        let user = self.username.clone();
        let mode = self.mode_bits | auth_mode::WITH_PASSWORD;
        self.write_preamble(buf, &user, mode, num_pairs)?;

        self.write_pair(buf, "AUTH_SESSKEY", &session_key_hex, 1)?;
        if let Some(speedy) = &speedy_hex {
            self.write_pair(buf, "AUTH_PBKDF2_SPEEDY_KEY", speedy, 0)?;
        }
        self.write_pair(buf, "AUTH_PASSWORD", &password_hex, 0)?;
        self.write_pair(buf, "SESSION_CLIENT_CHARSET", "873", 0)?;
        self.write_pair(buf, "SESSION_CLIENT_DRIVER_NAME", DRIVER_NAME, 0)?;
        self.write_pair(buf, "SESSION_CLIENT_VERSION", CLIENT_VERSION_WORD, 0)?;
        if let Some(class) = &self.connection_class {
            self.write_pair(buf, "AUTH_KPPL_CONN_CLASS", class, 0)?;
        }
        match self.purity {
            Purity::Default => {}
            Purity::New => self.write_pair(buf, "AUTH_KPPL_PURITY", "NEW", 0)?,
            Purity::Self_ => self.write_pair(buf, "AUTH_KPPL_PURITY", "SELF", 0)?,
        }
        if let Some(edition) = &self.edition {
            self.write_pair(buf, "AUTH_ORA_EDITION", edition, 0)?;
        }
        self.write_pair(buf, "AUTH_ALTER_SESSION", &timezone_statement(), 1)?;
        Ok(())
    }

    fn write_token_round(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        write_function_header(buf, FunctionCode::AuthPhaseTwo, self.sequence, caps)?;
        let token = self.token.clone().unwrap_or_default();
        let user = self.username.clone();
        self.write_preamble(buf, &user, self.mode_bits, 3)?;
        self.write_pair(buf, "AUTH_TOKEN", &token, 0)?;
        self.write_pair(buf, "SESSION_CLIENT_DRIVER_NAME", DRIVER_NAME, 0)?;
        self.write_pair(buf, "SESSION_CLIENT_VERSION", CLIENT_VERSION_WORD, 0)?;
        Ok(())
    }

    fn write_preamble(
        &self,
        buf: &mut WriteBuffer,
        user: &str,
        mode: u32,
        num_pairs: u32,
    ) -> Result<()> {
        let has_user = !user.is_empty();
        buf.write_u8(has_user as u8)?; // user pointer
        buf.write_ub4(user.len() as u32)?;
        buf.write_ub4(mode)?;
        buf.write_u8(1)?; // key/value list pointer
        buf.write_ub4(num_pairs)?;
        buf.write_u8(1)?; // output list pointer
        buf.write_u8(1)?; // output count pointer
        if has_user {
            buf.write_bytes_with_length(Some(user.as_bytes()))?;
        }
        Ok(())
    }

    fn write_pair(&self, buf: &mut WriteBuffer, key: &str, value: &str, flags: u32) -> Result<()> {
        buf.write_keyword_pair(key, value, flags)
    }

    fn pair(&self, key: &str) -> Result<&str> {
        self.server_pairs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::Auth(format!("server omitted {key}")))
    }

    fn pair_hex(&self, key: &str) -> Result<Vec<u8>> {
        hex::decode(self.pair(key)?)
            .map_err(|e| Error::Auth(format!("{key} is not valid hex: {e}")))
    }

    fn pair_u32(&self, key: &str) -> Result<u32> {
        self.pair(key)?
            .parse()
            .map_err(|_| Error::Auth(format!("{key} is not numeric")))
    }

    /// Derive the session keys after round one.
    fn derive_keys(&mut self) -> Result<()> {
        let verifier = VerifierKind::from_wire(self.verifier_wire_type)?;
        let verifier_data = self.pair_hex("AUTH_VFR_DATA")?;
        let server_key = self.pair_hex("AUTH_SESSKEY")?;

        match verifier {
            VerifierKind::V12c => {
                let iterations = self.pair_u32("AUTH_PBKDF2_VGEN_COUNT")?;
                let password_hash = password_hash_12c(&self.password, &verifier_data, iterations);
                let server_half = aes256_decrypt(&password_hash, &server_key)?;
                let client_half = random_key_half(server_half.len());
                self.client_session_key =
                    Some(aes256_encrypt(&password_hash, &client_half, Padding::Pkcs7)?);

                let salt = self.pair_hex("AUTH_PBKDF2_CSK_SALT")?;
                let sder_count = self.pair_u32("AUTH_PBKDF2_SDER_COUNT")?;
                self.combo_key = Some(combo_key_12c(
                    &server_half,
                    &client_half,
                    &salt,
                    sder_count,
                )?);
            }
            VerifierKind::V11g => {
                let password_hash = password_hash_11g(&self.password, &verifier_data);
                let server_half = aes192_decrypt(&password_hash, &server_key)?;
                let client_half = random_key_half(server_half.len());
                self.client_session_key =
                    Some(aes192_encrypt(&password_hash, &client_half, Padding::Zero)?);
                self.combo_key = Some(combo_key_11g(&server_half, &client_half)?);
            }
        }
        Ok(())
    }

    fn encrypt_password(&self, verifier: VerifierKind) -> Result<String> {
        let combo = self
            .combo_key
            .as_ref()
            .ok_or_else(|| Error::Auth("combo key missing".into()))?;
        let mut salted = random_salt().to_vec();
        salted.extend_from_slice(&self.password);
        let encrypted = match verifier {
            VerifierKind::V12c => aes256_encrypt(combo, &salted, Padding::Pkcs7)?,
            VerifierKind::V11g => aes192_encrypt(combo, &salted, Padding::Pkcs7)?,
        };
        Ok(hex::encode_upper(encrypted))
    }

    /// The speedy key lets 12c servers skip a PBKDF2 pass on later logons.
    fn speedy_key(&self, verifier: VerifierKind) -> Result<Option<String>> {
        if verifier != VerifierKind::V12c {
            return Ok(None);
        }
        let combo = self
            .combo_key
            .as_ref()
            .ok_or_else(|| Error::Auth("combo key missing".into()))?;
        let verifier_data = self.pair_hex("AUTH_VFR_DATA")?;
        let iterations = self.pair_u32("AUTH_PBKDF2_VGEN_COUNT")?;
        let password_key = password_key_12c(&self.password, &verifier_data, iterations);

        let mut plain = random_salt().to_vec();
        plain.extend_from_slice(&password_key);
        let encrypted = aes256_encrypt(combo, &plain, Padding::Pkcs7)?;
        Ok(Some(hex::encode_upper(&encrypted[..80])))
    }

    /// Check the AUTH_SVR_RESPONSE proof when the server sends one.
    fn verify_server_proof(&self) -> Result<()> {
        let response = match self.server_pairs.get("AUTH_SVR_RESPONSE") {
            Some(r) => r,
            None => return Ok(()),
        };
        let combo = self
            .combo_key
            .as_ref()
            .ok_or_else(|| Error::Auth("combo key missing".into()))?;
        let encrypted =
            hex::decode(response).map_err(|e| Error::Auth(format!("server proof: {e}")))?;
        let decrypted = match VerifierKind::from_wire(self.verifier_wire_type)? {
            VerifierKind::V12c => aes256_decrypt(combo, &encrypted)?,
            VerifierKind::V11g => aes192_decrypt(combo, &encrypted)?,
        };
        if decrypted.len() >= 32 && &decrypted[16..32] == b"SERVER_TO_CLIENT" {
            Ok(())
        } else {
            Err(Error::Auth("server failed mutual authentication".into()))
        }
    }

    fn parse_pairs(&mut self, buf: &mut ReadBuffer) -> Result<()> {
        let num_params = buf.read_ub2()?;
        for _ in 0..num_params {
            buf.skip_ub()?; // key length duplicate
            let key = buf.read_str_with_length()?.unwrap_or_default();
            let value_len = buf.read_ub4()?;
            let value = if value_len > 0 {
                buf.read_str_with_length()?.unwrap_or_default()
            } else {
                String::new()
            };
            if key == "AUTH_VFR_DATA" {
                self.verifier_wire_type = buf.read_ub4()?;
            } else {
                buf.skip_ub()?; // flags
            }
            self.server_pairs.insert(key, value);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.session = SessionInfo {
            session_id: self.pair_u32("AUTH_SESSION_ID").unwrap_or(0),
            serial_number: self.pair_u32("AUTH_SERIAL_NUM").unwrap_or(0) as u16,
            version_number: self.pair_u32("AUTH_VERSION_NO").unwrap_or(0),
            db_id: self
                .server_pairs
                .get("AUTH_GLOBALLY_UNIQUE_DBID")
                .cloned(),
        };
        if !self.token_auth() {
            self.verify_server_proof()?;
        }
        self.password.fill(0);
        self.round = Round::Done;
        Ok(())
    }
}

impl TtcMessage for AuthExchange {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        match self.round {
            Round::One if self.token_auth() || self.preliminary() => {
                // Single-round paths skip the challenge.
                self.round = Round::Two;
                self.write_token_round(buf, caps)
            }
            Round::One => self.write_round_one(buf, caps),
            Round::Two => self.write_round_two(buf, caps),
            Round::Done => Err(Error::Internal("authentication already complete".into())),
        }
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        _caps: &Capabilities,
    ) -> Result<()> {
        if message_type != MessageType::Parameter {
            return Err(Error::Protocol(format!(
                "unexpected message {message_type:?} during authentication"
            )));
        }
        self.parse_pairs(buf)?;
        match self.round {
            Round::One => {
                self.derive_keys()?;
                self.sequence += 1;
                self.round = Round::Two;
                self.state.resend = true;
            }
            Round::Two => self.finish()?,
            Round::Done => {}
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

/// Combined fast authentication (message type 34).
///
/// When the ACCEPT flags advertise fast auth and a populated endpoint
/// cookie exists, the protocol exchange, data type negotiation and the
/// first auth round ride in a single request. The auth resend then
/// proceeds as a plain round-two message.
pub struct FastAuthExchange {
    started: bool,
    /// The embedded protocol exchange; results applied after completion
    pub protocol: super::ProtocolExchange,
    data_types: super::DataTypesExchange,
    /// The embedded auth exchange
    pub auth: AuthExchange,
}

impl std::fmt::Debug for FastAuthExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastAuthExchange")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl FastAuthExchange {
    /// Bundle the three phase-two exchanges.
    pub fn new(params: &ConnectParams) -> Self {
        Self {
            started: false,
            protocol: super::ProtocolExchange::new(),
            data_types: super::DataTypesExchange::new(),
            auth: AuthExchange::new(params),
        }
    }
}

impl TtcMessage for FastAuthExchange {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        if self.started {
            // Round two after the embedded round one.
            return self.auth.write(buf, caps);
        }
        self.started = true;
        buf.write_u8(MessageType::FastAuth as u8)?;
        buf.write_u8(1)?; // version flag
        buf.write_u8(0)?; // reserved
        self.protocol.write(buf, caps)?;
        self.data_types.write(buf, caps)?;
        self.auth.write(buf, caps)
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()> {
        match message_type {
            MessageType::Protocol => {
                self.protocol.process(message_type, buf, caps)?;
                // The embedded protocol parse is not the end of the
                // combined stream.
                self.protocol.state().end_of_response = false;
                Ok(())
            }
            MessageType::DataTypes => {
                self.data_types.process(message_type, buf, caps)?;
                Ok(())
            }
            other => self.auth.process(other, buf, caps),
        }
    }

    fn state(&mut self) -> &mut MessageState {
        self.auth.state()
    }

    fn state_ref(&self) -> &MessageState {
        self.auth.state_ref()
    }
}

fn timezone_statement() -> String {
    if let Ok(tz) = std::env::var("ORA_SDTZ") {
        return format!("ALTER SESSION SET TIME_ZONE='{tz}'\0");
    }
    let now = chrono::Local::now();
    let offset = now.offset().local_minus_utc();
    let sign = if offset < 0 { '-' } else { '+' };
    let hours = offset.abs() / 3600;
    let minutes = (offset.abs() % 3600) / 60;
    format!("ALTER SESSION SET TIME_ZONE='{sign}{hours:02}:{minutes:02}'\0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PacketType;

    fn params() -> ConnectParams {
        ConnectParams::with_credentials("scott", "tiger")
    }

    fn request_body(exchange: &mut AuthExchange, caps: &Capabilities) -> Vec<u8> {
        let mut buf = WriteBuffer::new(32768, true);
        buf.start_request(PacketType::Data, 0);
        exchange.write(&mut buf, caps).unwrap();
        let packets = buf.end_request_raw();
        packets[0][10..].to_vec()
    }

    #[test]
    fn round_one_shape() {
        let caps = Capabilities::new();
        let mut exchange = AuthExchange::new(&params());
        let body = request_body(&mut exchange, &caps);
        assert_eq!(body[0], MessageType::Function as u8);
        assert_eq!(body[1], FunctionCode::AuthPhaseOne as u8);
        assert_eq!(body[2], 1); // sequence
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("SCOTT"));
        assert!(text.contains("AUTH_TERMINAL"));
        assert!(text.contains("AUTH_PROGRAM_NM"));
        assert!(text.contains("AUTH_MACHINE"));
        assert!(text.contains("AUTH_PID"));
    }

    #[test]
    fn username_uppercased() {
        let exchange = AuthExchange::new(&params());
        assert_eq!(exchange.username, "SCOTT");
    }

    #[test]
    fn sysdba_mode_bits() {
        let mut p = params();
        p.mode = crate::config::AuthMode::SysDba;
        let exchange = AuthExchange::new(&p);
        assert_ne!(exchange.mode_bits & auth_mode::SYSDBA, 0);
        assert_ne!(exchange.mode_bits & auth_mode::LOGON, 0);
    }

    #[test]
    fn token_auth_single_round() {
        let caps = Capabilities::new();
        let mut p = params();
        p.password.clear();
        p.token = Some("eyJhbGci".into());
        let mut exchange = AuthExchange::new(&p);
        let body = request_body(&mut exchange, &caps);
        assert_eq!(body[1], FunctionCode::AuthPhaseTwo as u8);
        assert!(String::from_utf8_lossy(&body).contains("AUTH_TOKEN"));
        assert_eq!(exchange.round, Round::Two);
    }

    #[test]
    fn round_transition_on_challenge() {
        let caps = Capabilities::new();
        let mut exchange = AuthExchange::new(&params());
        let _ = request_body(&mut exchange, &caps);

        // Simulate the server's round-one parameter block. The 11g verifier
        // avoids PBKDF2 parameters.
        let password_hash = password_hash_11g(b"tiger", &hex::decode("11223344").unwrap());
        let server_half = random_key_half(48);
        let encrypted_half =
            aes192_encrypt(&password_hash, &server_half, Padding::Zero).unwrap();

        let mut buf = WriteBuffer::new(32768, true);
        buf.start_request(PacketType::Data, 0);
        buf.write_ub2(2).unwrap();
        // AUTH_SESSKEY pair
        buf.write_ub4(12).unwrap();
        buf.write_str_with_length(Some("AUTH_SESSKEY")).unwrap();
        let hex_key = hex::encode_upper(&encrypted_half);
        buf.write_ub4(hex_key.len() as u32).unwrap();
        buf.write_str_with_length(Some(&hex_key)).unwrap();
        buf.write_ub4(0).unwrap();
        // AUTH_VFR_DATA pair with the verifier type trailing
        buf.write_ub4(13).unwrap();
        buf.write_str_with_length(Some("AUTH_VFR_DATA")).unwrap();
        buf.write_ub4(8).unwrap();
        buf.write_str_with_length(Some("11223344")).unwrap();
        buf.write_ub4(crate::constants::verifier::TYPE_11G_1).unwrap();
        let packets = buf.end_request_raw();

        let mut rbuf = ReadBuffer::from_bytes(packets[0].slice(10..));
        exchange
            .process(MessageType::Parameter, &mut rbuf, &caps)
            .unwrap();

        assert!(exchange.state_ref().resend);
        assert_eq!(exchange.round, Round::Two);
        assert!(exchange.combo_key.is_some());
        assert!(exchange.client_session_key.is_some());

        // Round two serializes with the derived material.
        exchange.state().begin_round_trip();
        let body = request_body(&mut exchange, &caps);
        assert_eq!(body[1], FunctionCode::AuthPhaseTwo as u8);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("AUTH_SESSKEY"));
        assert!(text.contains("AUTH_PASSWORD"));
        assert!(text.contains("AUTH_ALTER_SESSION"));
    }

    #[test]
    fn timezone_statement_is_terminated() {
        let stmt = timezone_statement();
        assert!(stmt.starts_with("ALTER SESSION SET TIME_ZONE="));
        assert!(stmt.ends_with('\0'));
    }
}
