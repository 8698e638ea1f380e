//! Wire encodings for Oracle data types.

pub mod date;
pub mod lob;
pub mod number;
pub mod oson;
pub mod rowid;
pub mod vector;

pub use date::{decode_datetime, encode_date, encode_timestamp, OracleDateTime};
pub use lob::{decode_lob_payload, LobChunk, LobLocator};
pub use number::{
    decode_binary_double, decode_binary_float, decode_number, encode_binary_double,
    encode_binary_float, encode_number, OracleNumber,
};
pub use oson::{decode_oson, encode_oson};
pub use rowid::{decode_rowid, parse_rowid, RowId};
pub use vector::{decode_vector, encode_vector, Vector, VectorValues};
