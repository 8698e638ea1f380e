//! LOB locator parsing.
//!
//! The server hands back an opaque locator for every LOB column; all LOB
//! content operations reference it. A handful of flag bytes near the front
//! are meaningful to the client: BLOB-ness, initialization, temporary
//! status and the character-length-semantics flag. Any mutation through a
//! locator invalidates a cached length.

use bytes::Bytes;

use crate::constants::{csfrm, lob_locator, OraType};

/// A server-side LOB reference.
#[derive(Debug, Clone)]
pub struct LobLocator {
    locator: Bytes,
    ora_type: OraType,
    charset_form: u8,
    chunk_size: u32,
    /// Cached length from the fetch that produced this locator; cleared by
    /// any write or trim.
    cached_length: Option<u64>,
}

impl LobLocator {
    /// Wrap locator bytes received from the server.
    pub fn new(locator: Bytes, ora_type: OraType, charset_form: u8) -> Self {
        Self {
            locator,
            ora_type,
            charset_form,
            chunk_size: 0,
            cached_length: None,
        }
    }

    /// Attach the chunk size reported at fetch time.
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Attach the length reported at fetch time.
    pub fn with_cached_length(mut self, length: u64) -> Self {
        self.cached_length = Some(length);
        self
    }

    /// The raw locator bytes for LOB operation messages.
    pub fn as_bytes(&self) -> &[u8] {
        &self.locator
    }

    /// Replace the locator bytes after a server operation returned an
    /// updated locator.
    pub fn update_bytes(&mut self, locator: Bytes) {
        self.locator = locator;
    }

    /// The LOB's column type.
    pub fn ora_type(&self) -> OraType {
        self.ora_type
    }

    /// Character set form; NCLOB locators carry [`csfrm::NCHAR`].
    pub fn charset_form(&self) -> u8 {
        self.charset_form
    }

    /// Preferred IO chunk size, zero when unknown.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// The length known from fetch time, if still valid.
    pub fn cached_length(&self) -> Option<u64> {
        self.cached_length
    }

    /// Forget the cached length. Called on every mutation.
    pub fn invalidate_length(&mut self) {
        self.cached_length = None;
    }

    fn flag(&self, offset: usize, bit: u8) -> bool {
        self.locator
            .get(offset)
            .map(|b| b & bit != 0)
            .unwrap_or(false)
    }

    /// True for BLOB locators.
    pub fn is_blob(&self) -> bool {
        self.ora_type == OraType::Blob
    }

    /// True once the server has initialized the locator.
    pub fn is_initialized(&self) -> bool {
        self.flag(lob_locator::OFFSET_FLAG_2, lob_locator::FLAG_2_INITIALIZED)
    }

    /// True for temporary LOBs, which must be freed explicitly.
    pub fn is_temporary(&self) -> bool {
        self.flag(lob_locator::OFFSET_FLAG_4, lob_locator::FLAG_4_TEMPORARY)
    }

    /// True when CLOB content is stored in a variable-width character set
    /// and arrives as UTF-16BE.
    pub fn uses_utf16(&self) -> bool {
        self.flag(
            lob_locator::OFFSET_FLAG_4,
            lob_locator::FLAG_4_VAR_LENGTH_CHARSET,
        )
    }

    /// Directory alias and file name of a BFILE locator.
    pub fn bfile_name(&self) -> Option<(String, String)> {
        if self.ora_type != OraType::Bfile {
            return None;
        }
        let data = &self.locator;
        let mut pos = lob_locator::FIXED_OFFSET;

        let dir_len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        pos += 2;
        let dir = data.get(pos..pos + dir_len)?;
        pos += dir_len;

        let file_len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        pos += 2;
        let file = data.get(pos..pos + file_len)?;

        Some((
            String::from_utf8_lossy(dir).into_owned(),
            String::from_utf8_lossy(file).into_owned(),
        ))
    }
}

/// Content read from a LOB: text for CLOB/NCLOB, bytes for BLOB/BFILE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobChunk {
    /// CLOB text
    Text(String),
    /// BLOB bytes
    Binary(Bytes),
}

impl LobChunk {
    /// Length in the LOB's native unit (characters for text, bytes for
    /// binary).
    pub fn len(&self) -> usize {
        match self {
            LobChunk::Text(s) => s.chars().count(),
            LobChunk::Binary(b) => b.len(),
        }
    }

    /// True for an empty chunk.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode raw LOB payload bytes into the right chunk kind for a locator.
pub fn decode_lob_payload(locator: &LobLocator, raw: Bytes) -> crate::error::Result<LobChunk> {
    if locator.is_blob() || locator.ora_type() == OraType::Bfile {
        return Ok(LobChunk::Binary(raw));
    }
    let text = if locator.uses_utf16() {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| crate::error::Error::Conversion(format!("CLOB UTF-16 data: {e}")))?
    } else {
        String::from_utf8(raw.to_vec())
            .map_err(|e| crate::error::Error::Conversion(format!("CLOB UTF-8 data: {e}")))?
    };
    Ok(LobChunk::Text(text))
}

/// The charset form a new temporary LOB of the given type should use.
pub fn default_charset_form(ora_type: OraType) -> u8 {
    match ora_type {
        OraType::Blob | OraType::Bfile => 0,
        _ => csfrm::IMPLICIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator_with_flags(flag2: u8, flag4: u8) -> LobLocator {
        let mut raw = vec![0u8; 40];
        raw[lob_locator::OFFSET_FLAG_2] = flag2;
        raw[lob_locator::OFFSET_FLAG_4] = flag4;
        LobLocator::new(Bytes::from(raw), OraType::Clob, csfrm::IMPLICIT)
    }

    #[test]
    fn flag_parsing() {
        let loc = locator_with_flags(
            lob_locator::FLAG_2_INITIALIZED,
            lob_locator::FLAG_4_TEMPORARY,
        );
        assert!(loc.is_initialized());
        assert!(loc.is_temporary());
        assert!(!loc.uses_utf16());

        let loc = locator_with_flags(0, lob_locator::FLAG_4_VAR_LENGTH_CHARSET);
        assert!(!loc.is_initialized());
        assert!(!loc.is_temporary());
        assert!(loc.uses_utf16());
    }

    #[test]
    fn cached_length_invalidation() {
        let mut loc = locator_with_flags(0, 0).with_cached_length(42);
        assert_eq!(loc.cached_length(), Some(42));
        loc.invalidate_length();
        assert_eq!(loc.cached_length(), None);
    }

    #[test]
    fn bfile_name_parsing() {
        let mut raw = vec![0u8; lob_locator::FIXED_OFFSET];
        raw.extend_from_slice(&4u16.to_be_bytes());
        raw.extend_from_slice(b"DATA");
        raw.extend_from_slice(&8u16.to_be_bytes());
        raw.extend_from_slice(b"file.dat");
        let loc = LobLocator::new(Bytes::from(raw), OraType::Bfile, 0);
        assert_eq!(
            loc.bfile_name(),
            Some(("DATA".to_string(), "file.dat".to_string()))
        );
    }

    #[test]
    fn bfile_name_requires_bfile() {
        let loc = locator_with_flags(0, 0);
        assert!(loc.bfile_name().is_none());
    }

    #[test]
    fn payload_decoding() {
        let clob = locator_with_flags(0, 0);
        let chunk = decode_lob_payload(&clob, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(chunk, LobChunk::Text("hello".into()));

        let utf16 = locator_with_flags(0, lob_locator::FLAG_4_VAR_LENGTH_CHARSET);
        let raw: Vec<u8> = "hi".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        let chunk = decode_lob_payload(&utf16, Bytes::from(raw)).unwrap();
        assert_eq!(chunk, LobChunk::Text("hi".into()));

        let blob = LobLocator::new(Bytes::from(vec![0u8; 40]), OraType::Blob, 0);
        let chunk = decode_lob_payload(&blob, Bytes::from_static(&[1, 2, 3])).unwrap();
        assert_eq!(chunk, LobChunk::Binary(Bytes::from_static(&[1, 2, 3])));
    }
}
