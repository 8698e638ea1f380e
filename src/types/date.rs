//! Oracle DATE, TIMESTAMP and TIMESTAMP WITH TIME ZONE wire encodings.
//!
//! DATE is 7 bytes: century+100, year-in-century+100, month, day, hour+1,
//! minute+1, second+1. TIMESTAMP appends a big-endian u32 of nanoseconds.
//! TIMESTAMP WITH TIME ZONE appends two more bytes, tz_hour+20 and
//! tz_minute+60, or a region id when the high bit of the tz hour byte is
//! set.

use crate::error::{Error, Result};

const TZ_HOUR_BIAS: i8 = 20;
const TZ_MINUTE_BIAS: i8 = 60;
const TZ_REGION_BIT: u8 = 0x80;

/// A date-time value in the Oracle calendar, year -4712 through 9999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OracleDateTime {
    /// Full year, e.g. 2024
    pub year: i32,
    /// 1-12
    pub month: u8,
    /// 1-31
    pub day: u8,
    /// 0-23
    pub hour: u8,
    /// 0-59
    pub minute: u8,
    /// 0-59
    pub second: u8,
    /// 0-999_999_999
    pub nanosecond: u32,
    /// Time zone hour offset, meaningful when `has_tz`
    pub tz_hour: i8,
    /// Time zone minute offset
    pub tz_minute: i8,
    /// The value carries a time zone
    pub has_tz: bool,
}

impl OracleDateTime {
    /// A date with a midnight time part.
    pub fn date(year: i32, month: u8, day: u8) -> Self {
        Self {
            year,
            month,
            day,
            ..Default::default()
        }
    }

    /// A full timestamp without a time zone.
    pub fn timestamp(
        year: i32,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        nanosecond: u32,
    ) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            nanosecond,
            ..Default::default()
        }
    }

    /// Attach a time zone offset.
    pub fn with_tz(mut self, tz_hour: i8, tz_minute: i8) -> Self {
        self.tz_hour = tz_hour;
        self.tz_minute = tz_minute;
        self.has_tz = true;
        self
    }
}

/// Decode a DATE (7 bytes), TIMESTAMP (11) or TIMESTAMP WITH TZ (13).
pub fn decode_datetime(data: &[u8]) -> Result<OracleDateTime> {
    if data.len() < 7 {
        return Err(Error::Conversion(format!(
            "date value needs at least 7 bytes, got {}",
            data.len()
        )));
    }

    let year = (data[0] as i32 - 100) * 100 + (data[1] as i32 - 100);
    let mut value = OracleDateTime {
        year,
        month: data[2],
        day: data[3],
        hour: data[4].saturating_sub(1),
        minute: data[5].saturating_sub(1),
        second: data[6].saturating_sub(1),
        ..Default::default()
    };

    if data.len() >= 11 {
        value.nanosecond = u32::from_be_bytes([data[7], data[8], data[9], data[10]]);
    }

    if data.len() >= 13 {
        if data[11] & TZ_REGION_BIT != 0 {
            return Err(Error::NotSupported(
                "named time zone regions in TIMESTAMP values".into(),
            ));
        }
        value.tz_hour = data[11] as i8 - TZ_HOUR_BIAS;
        value.tz_minute = data[12] as i8 - TZ_MINUTE_BIAS;
        value.has_tz = true;
    }

    Ok(value)
}

/// Encode the 7-byte DATE form.
pub fn encode_date(value: &OracleDateTime) -> [u8; 7] {
    [
        (value.year.div_euclid(100) + 100) as u8,
        (value.year.rem_euclid(100) + 100) as u8,
        value.month,
        value.day,
        value.hour + 1,
        value.minute + 1,
        value.second + 1,
    ]
}

/// Encode a TIMESTAMP, optionally with the time zone suffix. The output is
/// 7, 11 or 13 bytes depending on the fractional and tz parts.
pub fn encode_timestamp(value: &OracleDateTime, include_tz: bool) -> Vec<u8> {
    let mut out = encode_date(value).to_vec();
    if value.nanosecond > 0 || include_tz {
        out.extend_from_slice(&value.nanosecond.to_be_bytes());
    }
    if include_tz {
        out.push((value.tz_hour + TZ_HOUR_BIAS) as u8);
        out.push((value.tz_minute + TZ_MINUTE_BIAS) as u8);
    }
    out
}
