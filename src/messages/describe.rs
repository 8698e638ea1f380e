//! Column describe-info parsing.
//!
//! The DESCRIBE_INFO message announces the select list of a query: one
//! metadata block per column, followed by housekeeping fields. The layout
//! grows with the negotiated TTC field version; the 23.x additions (domain
//! names, annotations, vector metadata) are consumed but only the vector
//! fields are kept.

use crate::buffer::ReadBuffer;
use crate::caps::Capabilities;
use crate::constants::{ccap_value, OraType};
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;

/// Parse a DESCRIBE_INFO block into column metadata.
pub fn parse_describe_info(buf: &mut ReadBuffer, caps: &Capabilities) -> Result<Vec<ColumnInfo>> {
    buf.skip_bytes_with_length()?; // describe header bytes
    buf.skip_ub()?; // max row size
    let column_count = buf.read_ub4()? as usize;
    if column_count > 0 {
        buf.skip(1)?;
    }

    let mut columns = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        columns.push(parse_column(buf, caps)?);
    }

    // Trailing housekeeping: current date, then four counters, then the
    // query cache key.
    if buf.read_ub4()? > 0 {
        buf.skip_bytes_with_length()?;
    }
    buf.skip_ub()?; // dcbflag
    buf.skip_ub()?; // dcbmdbz
    buf.skip_ub()?; // dcbmnpr
    buf.skip_ub()?; // dcbmxpr
    if buf.read_ub4()? > 0 {
        buf.skip_bytes_with_length()?;
    }

    Ok(columns)
}

fn parse_column(buf: &mut ReadBuffer, caps: &Capabilities) -> Result<ColumnInfo> {
    let ora_type = OraType::try_from(buf.read_u8()?)?;
    buf.skip(1)?; // flags
    let precision = buf.read_u8()?;
    let scale = buf.read_u8()? as i8;
    let buffer_size = buf.read_ub4()?;
    buf.skip_ub()?; // max array elements
    buf.skip_ub()?; // cont flags

    let oid = {
        let oid_len = buf.read_ub4()?;
        if oid_len > 0 {
            buf.read_bytes_with_length()?
        } else {
            None
        }
    };
    buf.skip_ub()?; // version
    buf.skip_ub()?; // character set id
    let charset_form = buf.read_u8()?;
    let mut max_size = buf.read_ub4()?;
    if ora_type == OraType::Raw {
        max_size = buffer_size;
    }
    if caps.ttc_field_version >= ccap_value::FIELD_VERSION_12_2 {
        buf.skip_ub()?; // oaccolid
    }
    let nullable = buf.read_u8()? != 0;
    buf.skip(1)?; // v7 name length

    let name = if buf.read_ub4()? > 0 {
        buf.read_str_with_length()?
            .ok_or_else(|| Error::Protocol("column name missing".into()))?
    } else {
        return Err(Error::Protocol("column without a name".into()));
    };

    // Type schema and name for object columns.
    if buf.read_ub4()? > 0 {
        buf.skip_bytes_with_length()?;
    }
    if buf.read_ub4()? > 0 {
        buf.skip_bytes_with_length()?;
    }
    buf.skip_ub()?; // column position
    buf.skip_ub()?; // uds flag

    if caps.ttc_field_version >= ccap_value::FIELD_VERSION_23_1 {
        // Domain schema and name.
        if buf.read_ub4()? > 0 {
            buf.skip_bytes_with_length()?;
        }
        if buf.read_ub4()? > 0 {
            buf.skip_bytes_with_length()?;
        }
        // Annotations.
        if buf.read_ub4()? > 0 {
            buf.skip(1)?;
            let count = buf.read_ub4()?;
            buf.skip(1)?;
            for _ in 0..count {
                buf.skip_ub()?;
                buf.skip_bytes_with_length()?;
                if buf.read_ub4()? > 0 {
                    buf.skip_bytes_with_length()?;
                }
                buf.skip_ub()?;
            }
            buf.skip_ub()?;
        }
    }

    let mut vector_dimensions = 0;
    let mut vector_format = 0;
    if caps.ttc_field_version >= ccap_value::FIELD_VERSION_23_4 {
        vector_dimensions = buf.read_ub4()?;
        vector_format = buf.read_u8()?;
        let vector_flags = buf.read_u8()?;
        if vector_flags & 0x01 != 0 {
            vector_dimensions = 0; // flexible dimensions
        }
    }

    let mut column = ColumnInfo::new(name, ora_type);
    column.buffer_size = buffer_size;
    column.max_size = max_size;
    column.precision = precision;
    column.scale = scale;
    column.nullable = nullable;
    column.charset_form = charset_form;
    column.vector_dimensions = vector_dimensions;
    column.vector_format = vector_format;
    column.type_oid = oid;
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteBuffer;
    use crate::constants::PacketType;

    /// Serialize one column block the way a 19c server would.
    fn write_column(buf: &mut WriteBuffer, name: &str, ora_type: OraType, precision: u8, scale: i8) {
        buf.write_u8(ora_type as u8).unwrap();
        buf.write_u8(0).unwrap(); // flags
        buf.write_u8(precision).unwrap();
        buf.write_u8(scale as u8).unwrap();
        buf.write_ub4(22).unwrap(); // buffer size
        buf.write_ub4(0).unwrap(); // max array elements
        buf.write_ub8(0).unwrap(); // cont flags
        buf.write_ub4(0).unwrap(); // oid
        buf.write_ub2(0).unwrap(); // version
        buf.write_ub2(0).unwrap(); // charset id
        buf.write_u8(1).unwrap(); // charset form
        buf.write_ub4(22).unwrap(); // max size
        buf.write_ub4(0).unwrap(); // oaccolid (12.2+)
        buf.write_u8(1).unwrap(); // nullable
        buf.write_u8(0).unwrap(); // v7 name length
        buf.write_ub4(1).unwrap(); // name present
        buf.write_str_with_length(Some(name)).unwrap();
        buf.write_ub4(0).unwrap(); // type schema
        buf.write_ub4(0).unwrap(); // type name
        buf.write_ub2(0).unwrap(); // position
        buf.write_ub4(0).unwrap(); // uds flag
    }

    #[test]
    fn parses_single_number_column() {
        let caps = Capabilities {
            ttc_field_version: ccap_value::FIELD_VERSION_19_1,
            ..Capabilities::new()
        };

        let mut wb = WriteBuffer::new(8192, true);
        wb.start_request(PacketType::Data, 0);
        wb.write_u8(0).unwrap(); // describe header bytes (empty)
        wb.write_ub4(0).unwrap(); // max row size
        wb.write_ub4(1).unwrap(); // column count
        wb.write_u8(0).unwrap();
        write_column(&mut wb, "1", OraType::Number, 0, 0);
        wb.write_ub4(0).unwrap(); // current date
        wb.write_ub4(0).unwrap(); // dcbflag
        wb.write_ub4(0).unwrap(); // dcbmdbz
        wb.write_ub4(0).unwrap(); // dcbmnpr
        wb.write_ub4(0).unwrap(); // dcbmxpr
        wb.write_ub4(0).unwrap(); // qcky
        let packets = wb.end_request_raw();

        let mut buf = ReadBuffer::from_bytes(packets[0].slice(10..));
        let columns = parse_describe_info(&mut buf, &caps).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "1");
        assert_eq!(columns[0].ora_type, OraType::Number);
        assert!(columns[0].nullable);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn partial_describe_suspends_cleanly() {
        let caps = Capabilities {
            ttc_field_version: ccap_value::FIELD_VERSION_19_1,
            ..Capabilities::new()
        };
        let mut wb = WriteBuffer::new(8192, true);
        wb.start_request(PacketType::Data, 0);
        wb.write_u8(0).unwrap();
        wb.write_ub4(0).unwrap();
        wb.write_ub4(1).unwrap();
        wb.write_u8(0).unwrap();
        write_column(&mut wb, "X", OraType::Varchar, 0, 0);
        let packets = wb.end_request_raw();
        let body = packets[0].slice(10..);

        // Truncate mid-column: the parser must report OutOfPackets, not junk.
        let mut buf = ReadBuffer::from_bytes(body.slice(..8));
        assert!(matches!(
            parse_describe_info(&mut buf, &caps),
            Err(Error::OutOfPackets)
        ));
    }
}
