//! Data type negotiation message (TTC type 2).
//!
//! After the protocol exchange, the client declares every TTC data type it
//! will use, together with the type each converts to and its representation
//! (universal or Oracle-native). The list covers the whole TTC type space,
//! not just SQL column types; servers reject sessions that omit entries
//! they later see on the wire. The server echoes a list in the same shape,
//! which is validated and discarded.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::caps::Capabilities;
use crate::constants::{charset, MessageType};
use crate::error::{Error, Result};

use super::{MessageState, TtcMessage};

const REP_UNIVERSAL: u16 = 1;
const REP_ORACLE: u16 = 10;

/// Character data is multi-byte and lengths are in characters.
const ENCODING_FLAGS: u8 = 0x01 | 0x02;

/// Every TTC data type id declared during negotiation, in protocol order.
#[rustfmt::skip]
const TYPE_IDS: &[u16] = &[
    1, 2, 8, 12, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 10, 11, 40, 41, 117, 120,
    290, 291, 292, 293, 294, 298, 299, 300, 301, 302, 303, 304, 305, 306, 307, 308, 309,
    310, 311, 312, 313, 315, 316, 317, 318, 319, 320, 321, 322, 323, 327, 328, 329, 331,
    333, 334, 335, 336, 337, 338, 339, 340, 341, 342, 343, 344, 345, 346, 348, 349, 354,
    355, 359, 363, 380, 381, 382, 383, 384, 385, 386, 387, 388, 389, 390, 391, 393, 394,
    395, 396, 397, 398, 399, 400, 401, 404, 405, 406, 407, 413, 414, 415, 416, 417, 418,
    419, 420, 421, 422, 423, 424, 425, 426, 427, 429, 430, 431, 432, 433, 449, 450, 454,
    455, 456, 457, 458, 459, 460, 461, 462, 463, 466, 467, 468, 469, 470, 471, 472, 473,
    474, 475, 476, 477, 478, 479, 480, 481, 482, 483, 484, 485, 486, 490, 491, 492, 493,
    494, 495, 496, 498, 499, 500, 501, 502, 509, 510, 513, 514, 516, 517, 518, 519, 520,
    521, 522, 523, 524, 525, 526, 527, 528, 529, 530, 531, 532, 533, 534, 535, 536, 537,
    538, 539, 540, 541, 542, 543, 560, 565, 572, 573, 574, 575, 576, 578, 563, 564, 579,
    580, 581, 582, 583, 584, 585, 3, 4, 5, 6, 7, 9, 15, 39, 68, 91, 94, 95, 96, 97, 100,
    101, 102, 104, 106, 108, 109, 110, 111, 112, 113, 114, 115, 116, 119, 198, 146, 152,
    153, 154, 155, 156, 172, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187, 188, 189,
    190, 195, 196, 197, 208, 231, 232, 233, 241, 252, 590, 591, 592, 613, 614, 615, 616,
    611, 612, 593, 594, 595, 596, 597, 598, 599, 600, 601, 602, 603, 604, 605, 622, 623,
    624, 625, 626, 627, 628, 629, 630, 631, 632, 637, 638, 636, 639, 663, 640, 652, 646,
    647, 127, 660, 661, 665,
];

/// The type a given id converts to. Most convert to themselves; the
/// numeric aliases map onto NUMBER (2) and the degenerate forms onto their
/// canonical type.
fn conversion_of(id: u16) -> u16 {
    match id {
        3 | 4 | 6 | 7 | 68 | 91 | 152 | 153 | 154 | 172 => 2,
        5 | 9 | 15 | 94 | 155 => 1,
        95 => 23,
        97 => 96,
        104 => 11,
        108 => 109,
        110 => 111,
        116 => 102,
        156 | 184 => 12,
        195 => 112,
        196 => 113,
        197 => 114,
        232 => 231,
        241 => 109,
        _ => id,
    }
}

/// Oracle-native representation applies to the packed-decimal and date
/// family; everything else is universal.
fn representation_of(id: u16) -> u16 {
    match id {
        2 | 3 | 4 | 6 | 7 | 12 | 27 | 68 | 91 | 152 | 153 | 154 | 156 | 172 | 184 => REP_ORACLE,
        _ => REP_UNIVERSAL,
    }
}

/// Data type negotiation codec.
#[derive(Debug, Default)]
pub struct DataTypesExchange {
    state: MessageState,
}

impl DataTypesExchange {
    /// A fresh exchange.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TtcMessage for DataTypesExchange {
    fn write(&mut self, buf: &mut WriteBuffer, caps: &Capabilities) -> Result<()> {
        buf.write_u8(MessageType::DataTypes as u8)?;

        // Charset ids travel little-endian in this message.
        for _ in 0..2 {
            buf.write_u8((charset::UTF8 & 0xFF) as u8)?;
            buf.write_u8((charset::UTF8 >> 8) as u8)?;
        }
        buf.write_u8(ENCODING_FLAGS)?;

        buf.write_bytes_with_length(Some(&caps.compile_caps))?;
        buf.write_bytes_with_length(Some(&caps.runtime_caps))?;

        for &id in TYPE_IDS {
            buf.write_u16_be(id)?;
            buf.write_u16_be(conversion_of(id))?;
            buf.write_u16_be(representation_of(id))?;
            buf.write_u16_be(0)?;
        }
        buf.write_u16_be(0)?; // terminator
        Ok(())
    }

    fn process(
        &mut self,
        message_type: MessageType,
        buf: &mut ReadBuffer,
        caps: &Capabilities,
    ) -> Result<()> {
        if message_type != MessageType::DataTypes {
            return Err(Error::Protocol(format!(
                "unexpected message {message_type:?} during data type negotiation"
            )));
        }
        // The server's echo is walked for validity and dropped.
        loop {
            let data_type = buf.read_u16_be()?;
            if data_type == 0 {
                break;
            }
            let conversion = buf.read_u16_be()?;
            if conversion != 0 {
                buf.skip(4)?;
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PacketType;
    use crate::messages::process_one_message;

    #[test]
    fn table_covers_sql_types() {
        for id in [1u16, 2, 12, 23, 96, 100, 101, 102, 112, 113, 119, 127, 180, 181, 252] {
            assert!(TYPE_IDS.contains(&id), "type {id} missing from negotiation");
        }
    }

    #[test]
    fn conversions_are_closed_over_the_table() {
        for &id in TYPE_IDS {
            let conv = conversion_of(id);
            assert!(
                conv == id || TYPE_IDS.contains(&conv),
                "conversion target {conv} of {id} not negotiated"
            );
        }
    }

    #[test]
    fn request_shape() {
        let caps = Capabilities::new();
        let mut msg = DataTypesExchange::new();
        let mut buf = WriteBuffer::new(32768, true);
        buf.start_request(PacketType::Data, 0);
        msg.write(&mut buf, &caps).unwrap();
        let packets = buf.end_request_raw();
        let body = &packets[0][10..];

        assert_eq!(body[0], MessageType::DataTypes as u8);
        // Little-endian UTF8 charset id, twice.
        assert_eq!(&body[1..5], &[0x69, 0x03, 0x69, 0x03]);
        assert_eq!(body[5], ENCODING_FLAGS);
        // Terminates with a zero type id.
        assert_eq!(&body[body.len() - 2..], &[0, 0]);
    }

    #[test]
    fn echo_is_consumed() {
        let caps = Capabilities::new();
        let mut payload = vec![MessageType::DataTypes as u8];
        for &(id, conv) in &[(1u16, 1u16), (2, 2)] {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&conv.to_be_bytes());
            payload.extend_from_slice(&[0, 1, 0, 0]);
        }
        payload.extend_from_slice(&[0, 0]);

        let mut msg = DataTypesExchange::new();
        let mut buf = ReadBuffer::from_slice(&payload);
        process_one_message(&mut msg, &mut buf, &caps).unwrap();
        assert!(msg.state_ref().end_of_response);
        assert!(buf.is_exhausted());
    }
}
