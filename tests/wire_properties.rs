//! Wire-format laws the driver must uphold, exercised end to end through
//! the public buffer and type codec APIs.

use bytes::Bytes;
use orathin::buffer::{ReadBuffer, WriteBuffer};
use orathin::constants::{MarkerType, PacketType, PACKET_HEADER_SIZE};
use orathin::packet::{build_marker, PacketHeader};
use orathin::types::{
    decode_datetime, decode_number, decode_oson, encode_number, encode_oson, encode_timestamp,
    OracleDateTime,
};
use serde_json::json;

// =============================================================================
// Oracle NUMBER round trips
// =============================================================================

#[test]
fn number_zero_is_the_single_byte_0x80() {
    let encoded = encode_number("0").unwrap();
    assert_eq!(encoded, vec![0x80]);
    assert_eq!(decode_number(&encoded).unwrap().as_str(), "0");
}

#[test]
fn number_round_trips_preserve_text() {
    let samples = [
        "1",
        "-1",
        "7.1",
        "-7.1",
        "21.3",
        "123456789012345678",
        "-123456789012345678",
        "0.000001",
        "99999999.99999999",
        "-0.5",
        "1000000",
    ];
    for text in samples {
        let encoded = encode_number(text).unwrap();
        let decoded = decode_number(&encoded).unwrap();
        assert_eq!(decoded.as_str(), text, "round trip of {text}");
    }
}

#[test]
fn number_scale_arithmetic_survives() {
    // 7.1 fetched as decimal text must multiply exactly.
    let encoded = encode_number("7.1").unwrap();
    let decoded = decode_number(&encoded).unwrap();
    // Emulate exact decimal multiplication on the text form.
    let value: f64 = decoded.as_str().parse().unwrap();
    assert!((value * 3.0 - 21.3).abs() < 1e-9);
}

#[test]
fn number_wire_bytes_for_known_values() {
    assert_eq!(encode_number("123").unwrap(), vec![0xC2, 0x02, 0x18]);
    assert_eq!(encode_number("-5").unwrap(), vec![0x3E, 0x60, 0x66]);
}

// =============================================================================
// DATE / TIMESTAMP round trips across the supported range
// =============================================================================

#[test]
fn date_round_trips_across_supported_range() {
    for (year, month, day) in [(1, 1, 1), (1582, 10, 4), (2024, 2, 29), (9999, 12, 31)] {
        let value = OracleDateTime::timestamp(year, month, day, 23, 59, 58, 0);
        let encoded = orathin::types::encode_date(&value);
        assert_eq!(decode_datetime(&encoded).unwrap(), value);
    }
}

#[test]
fn timestamp_tz_round_trips() {
    for (tz_hour, tz_minute) in [(0, 0), (5, 30), (-8, 0), (13, 45)] {
        let value = OracleDateTime::timestamp(2024, 6, 15, 12, 0, 0, 123_000_000)
            .with_tz(tz_hour, tz_minute);
        let encoded = encode_timestamp(&value, true);
        assert_eq!(encoded.len(), 13);
        let decoded = decode_datetime(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}

// =============================================================================
// OSON round trips
// =============================================================================

#[test]
fn oson_round_trips_scalars_and_nesting() {
    let values = [
        json!(null),
        json!(true),
        json!(false),
        json!(0),
        json!(-9_007_199_254_740_991i64),
        json!(2.5),
        json!("text"),
        json!({"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}}),
        json!([[[1], [2]], [[3]]]),
    ];
    for value in values {
        let encoded = encode_oson(&value).unwrap();
        assert_eq!(decode_oson(encoded).unwrap(), value, "round trip failed");
    }
}

#[test]
fn oson_handles_64k_strings_and_depth_32() {
    let big = json!("s".repeat(64 * 1024));
    let encoded = encode_oson(&big).unwrap();
    assert_eq!(decode_oson(encoded).unwrap(), big);

    let mut deep = json!(1);
    for _ in 0..32 {
        deep = json!({"n": deep});
    }
    let encoded = encode_oson(&deep).unwrap();
    assert_eq!(decode_oson(encoded).unwrap(), deep);
}

// =============================================================================
// Packetized buffer laws
// =============================================================================

#[test]
fn request_larger_than_sdu_packetizes_and_replays() {
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let mut writer = WriteBuffer::new(2048, true);
    writer.start_request(PacketType::Data, 0);
    writer.write_bytes_with_length(Some(&payload)).unwrap();
    writer.write_ub4(0xDEAD).unwrap();
    let packets = writer.end_request_raw();
    assert!(packets.len() > 1, "expected multiple packets");
    for packet in &packets {
        let header = PacketHeader::parse(packet, true).unwrap();
        assert_eq!(header.length as usize, packet.len());
        assert!(packet.len() <= 2048);
    }

    // Feed the packets back one at a time; decode must suspend cleanly on
    // OutOfPackets and replay from the restore point.
    let mut reader = ReadBuffer::new();
    let mut iter = packets.iter();
    reader.push_segment(iter.next().unwrap().slice(PACKET_HEADER_SIZE + 2..));
    let decoded = loop {
        let save = reader.save();
        match reader.read_bytes_with_length() {
            Ok(value) => break value.unwrap(),
            Err(orathin::Error::OutOfPackets) => {
                reader.restore(save);
                let next = iter.next().expect("decoder exhausted all packets");
                reader.push_segment(next.slice(PACKET_HEADER_SIZE + 2..));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    };
    assert_eq!(decoded, payload);
    assert_eq!(reader.read_ub4().unwrap(), 0xDEAD);
}

#[test]
fn marker_packets_are_three_payload_bytes() {
    for (marker, byte) in [
        (MarkerType::Break, 1u8),
        (MarkerType::Reset, 2),
        (MarkerType::Interrupt, 3),
    ] {
        let bytes = build_marker(marker, false);
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE + 3);
        assert_eq!(bytes[4], PacketType::Marker as u8);
        assert_eq!(&bytes[PACKET_HEADER_SIZE..], &[1, 0, byte]);
    }
}

#[test]
fn restore_points_are_exact() {
    let mut reader = ReadBuffer::new();
    reader.push_segment(Bytes::from_static(&[1, 2, 3]));
    reader.push_segment(Bytes::from_static(&[4, 5]));

    reader.read_u8().unwrap();
    let save = reader.save();
    assert_eq!(reader.read_u32_be().unwrap(), 0x02030405);
    reader.restore(save);
    assert_eq!(reader.read_u8().unwrap(), 2);
}
