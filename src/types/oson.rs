//! OSON, Oracle's binary JSON format.
//!
//! An OSON image is: magic `FF 4A 5A`, a version byte, a u16 flag word,
//! then (for non-scalars) a field-name dictionary segment followed by a
//! tree segment of type-tagged nodes. Objects reference field names by id
//! into the dictionary; containers address their children by offset into
//! the tree segment.
//!
//! The decoder accepts both dictionary versions (255 and 65535 byte field
//! names) and both absolute and relative container offsets. The encoder
//! emits version 1 images with absolute offsets, picking u16 or u32
//! offsets based on the tree size.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::types::number::{decode_number, encode_number};

const MAGIC: [u8; 3] = [0xFF, 0x4A, 0x5A];
const VERSION_SHORT_NAMES: u8 = 1;
const VERSION_LONG_NAMES: u8 = 3;

// Primary flag word
const FLAG_REL_OFFSETS: u16 = 0x0001;
const FLAG_INLINE_LEAF: u16 = 0x0002;
const FLAG_NUM_FNAMES_U32: u16 = 0x0008;
const FLAG_IS_SCALAR: u16 = 0x0010;
const FLAG_HASH_ID_U8: u16 = 0x0100;
const FLAG_NUM_FNAMES_U16: u16 = 0x0400;
const FLAG_FNAMES_SEG_U32: u16 = 0x0800;
const FLAG_TREE_SEG_U32: u16 = 0x1000;
const FLAG_TINY_NODES_STAT: u16 = 0x2000;

// Secondary flag word (long-name dictionaries)
const FLAG2_FNAMES_OFFSETS_U16: u16 = 0x0100;

// Node type tags
const NODE_NULL: u8 = 0x30;
const NODE_TRUE: u8 = 0x31;
const NODE_FALSE: u8 = 0x32;
const NODE_STRING_U8: u8 = 0x33;
const NODE_NUMBER_U8: u8 = 0x34;
const NODE_BINARY_DOUBLE: u8 = 0x36;
const NODE_STRING_U16: u8 = 0x37;
const NODE_STRING_U32: u8 = 0x38;
const NODE_TIMESTAMP: u8 = 0x39;
const NODE_BINARY_U16: u8 = 0x3A;
const NODE_BINARY_U32: u8 = 0x3B;
const NODE_DATE: u8 = 0x3C;
const NODE_INTERVAL_YM: u8 = 0x3D;
const NODE_INTERVAL_DS: u8 = 0x3E;
const NODE_EXTENDED: u8 = 0x7B;
const NODE_TIMESTAMP_TZ: u8 = 0x7C;
const NODE_TIMESTAMP7: u8 = 0x7D;
const NODE_ID: u8 = 0x7E;
const NODE_BINARY_FLOAT: u8 = 0x7F;
const NODE_OBJECT: u8 = 0x84;
const NODE_ARRAY: u8 = 0xC0;
const EXTENDED_VECTOR: u8 = 0x01;

// Container type byte bits
const CONTAINER_BIT: u8 = 0x80;
const ARRAY_BIT: u8 = 0x40;
const OFFSETS_U32_BIT: u8 = 0x20;
const COUNT_BITS: u8 = 0x18;
const COUNT_U16: u8 = 0x08;
const COUNT_U32: u8 = 0x10;
const COUNT_SHARED: u8 = 0x18;

/// Decode an OSON image into a JSON value.
pub fn decode_oson(data: Bytes) -> Result<Json> {
    Decoder::new(data)?.run()
}

/// Encode a JSON value into an OSON image.
pub fn encode_oson(value: &Json) -> Result<Bytes> {
    Encoder::default().run(value)
}

struct Decoder {
    data: Bytes,
    pos: usize,
    field_names: Vec<String>,
    field_id_width: usize,
    tree_base: usize,
    relative_offsets: bool,
}

impl Decoder {
    fn new(data: Bytes) -> Result<Self> {
        if data.len() < 6 || data[..3] != MAGIC {
            return Err(Error::Conversion("not an OSON image".into()));
        }
        Ok(Self {
            data,
            pos: 3,
            field_names: Vec::new(),
            field_id_width: 1,
            tree_base: 0,
            relative_offsets: false,
        })
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Conversion("truncated OSON image".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn run(&mut self) -> Result<Json> {
        let version = self.u8()?;
        if version != VERSION_SHORT_NAMES && version != VERSION_LONG_NAMES {
            return Err(Error::Conversion(format!("OSON version {version} not supported")));
        }

        let flags = self.u16()?;
        self.relative_offsets = flags & FLAG_REL_OFFSETS != 0;

        if flags & FLAG_IS_SCALAR != 0 {
            // Tree segment size, then the single node.
            if flags & FLAG_TREE_SEG_U32 != 0 {
                self.u32()?;
            } else {
                self.u16()?;
            }
            self.tree_base = self.pos;
            return self.node();
        }

        let num_short_names = if flags & FLAG_NUM_FNAMES_U32 != 0 {
            self.field_id_width = 4;
            self.u32()?
        } else if flags & FLAG_NUM_FNAMES_U16 != 0 {
            self.field_id_width = 2;
            self.u16()? as u32
        } else {
            self.field_id_width = 1;
            self.u8()? as u32
        };

        let short_offset_width = if flags & FLAG_FNAMES_SEG_U32 != 0 { 4 } else { 2 };
        let short_seg_size = if flags & FLAG_FNAMES_SEG_U32 != 0 {
            self.u32()?
        } else {
            self.u16()? as u32
        };

        let mut num_long_names = 0u32;
        let mut long_offset_width = 0usize;
        let mut long_seg_size = 0u32;
        if version == VERSION_LONG_NAMES {
            let secondary = self.u16()?;
            long_offset_width = if secondary & FLAG2_FNAMES_OFFSETS_U16 != 0 { 2 } else { 4 };
            num_long_names = self.u32()?;
            long_seg_size = self.u32()?;
        }

        // Tree segment size and tiny-node count.
        if flags & FLAG_TREE_SEG_U32 != 0 {
            self.u32()?;
        } else {
            self.u16()?;
        }
        self.u16()?;

        if num_short_names > 0 {
            self.read_dictionary(num_short_names, 1, short_offset_width, short_seg_size, 1)?;
        }
        if num_long_names > 0 {
            self.read_dictionary(num_long_names, 2, long_offset_width, long_seg_size, 2)?;
        }

        self.tree_base = self.pos;
        self.node()
    }

    fn read_dictionary(
        &mut self,
        count: u32,
        hash_width: usize,
        offset_width: usize,
        seg_size: u32,
        name_len_width: usize,
    ) -> Result<()> {
        self.take(count as usize * hash_width)?; // hash ids, unused here

        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            offsets.push(if offset_width == 2 {
                self.u16()? as u32
            } else {
                self.u32()?
            });
        }

        let seg_start = self.pos;
        let seg = self.take(seg_size as usize)?.to_vec();
        let _ = seg_start;

        for off in offsets {
            let off = off as usize;
            let (len, data_start) = if name_len_width == 1 {
                if off >= seg.len() {
                    return Err(Error::Conversion("field name offset out of range".into()));
                }
                (seg[off] as usize, off + 1)
            } else {
                if off + 2 > seg.len() {
                    return Err(Error::Conversion("field name offset out of range".into()));
                }
                (
                    u16::from_be_bytes([seg[off], seg[off + 1]]) as usize,
                    off + 2,
                )
            };
            if data_start + len > seg.len() {
                return Err(Error::Conversion("field name runs past segment".into()));
            }
            self.field_names
                .push(String::from_utf8_lossy(&seg[data_start..data_start + len]).into_owned());
        }
        Ok(())
    }

    fn node(&mut self) -> Result<Json> {
        let tag = self.u8()?;

        if tag & CONTAINER_BIT != 0 {
            return self.container(tag);
        }

        match tag {
            NODE_NULL => Ok(Json::Null),
            NODE_TRUE => Ok(Json::Bool(true)),
            NODE_FALSE => Ok(Json::Bool(false)),
            NODE_STRING_U8 => {
                let len = self.u8()? as usize;
                self.string(len)
            }
            NODE_STRING_U16 => {
                let len = self.u16()? as usize;
                self.string(len)
            }
            NODE_STRING_U32 => {
                let len = self.u32()? as usize;
                self.string(len)
            }
            NODE_NUMBER_U8 => {
                let len = self.u8()? as usize;
                self.number(len)
            }
            NODE_BINARY_DOUBLE => {
                let raw = self.take(8)?;
                let v = crate::types::number::decode_binary_double(raw)?;
                Ok(serde_json::json!(v))
            }
            NODE_BINARY_FLOAT => {
                let raw = self.take(4)?;
                let v = crate::types::number::decode_binary_float(raw)?;
                Ok(serde_json::json!(v))
            }
            NODE_DATE | NODE_TIMESTAMP7 => {
                let raw = self.take(7)?.to_vec();
                Ok(Json::String(render_datetime(&raw)?))
            }
            NODE_TIMESTAMP => {
                let raw = self.take(11)?.to_vec();
                Ok(Json::String(render_datetime(&raw)?))
            }
            NODE_TIMESTAMP_TZ => {
                let raw = self.take(13)?.to_vec();
                Ok(Json::String(render_datetime(&raw)?))
            }
            NODE_BINARY_U16 => {
                let len = self.u16()? as usize;
                let raw = self.take(len)?;
                Ok(Json::String(hex::encode_upper(raw)))
            }
            NODE_BINARY_U32 => {
                let len = self.u32()? as usize;
                let raw = self.take(len)?;
                Ok(Json::String(hex::encode_upper(raw)))
            }
            NODE_ID => {
                let len = self.u8()? as usize;
                let raw = self.take(len)?;
                Ok(Json::String(hex::encode_upper(raw)))
            }
            NODE_INTERVAL_YM | NODE_INTERVAL_DS => Err(Error::NotSupported(
                "interval values inside JSON".into(),
            )),
            NODE_EXTENDED => {
                let sub = self.u8()?;
                if sub == EXTENDED_VECTOR {
                    let len = self.u32()? as usize;
                    let raw = self.take(len)?.to_vec();
                    let vector = crate::types::vector::decode_vector(&raw)?;
                    Ok(vector.to_json())
                } else {
                    Err(Error::Conversion(format!("extended OSON node {sub:#04x}")))
                }
            }
            tag if tag & 0xF0 == 0x20 || tag & 0xF0 == 0x60 => {
                // Inline packed decimal, length in the low nibble plus one.
                let len = (tag & 0x0F) as usize + 1;
                self.number(len)
            }
            tag if tag & 0xF0 == 0x40 || tag & 0xF0 == 0x50 => {
                let len = (tag & 0x0F) as usize;
                self.number(len)
            }
            tag if tag & 0xE0 == 0 => {
                // Inline string, length in the tag itself.
                self.string(tag as usize)
            }
            other => Err(Error::Conversion(format!("OSON node tag {other:#04x}"))),
        }
    }

    fn string(&mut self, len: usize) -> Result<Json> {
        let raw = self.take(len)?;
        Ok(Json::String(
            String::from_utf8(raw.to_vec()).map_err(|e| Error::Conversion(e.to_string()))?,
        ))
    }

    fn number(&mut self, len: usize) -> Result<Json> {
        let raw = self.take(len)?.to_vec();
        let number = decode_number(&raw)?;
        if number.is_integer {
            if let Ok(v) = number.to_i64() {
                return Ok(Json::from(v));
            }
        }
        Ok(serde_json::json!(number.to_f64()?))
    }

    fn read_offset(&mut self, tag: u8) -> Result<u32> {
        if tag & OFFSETS_U32_BIT != 0 {
            self.u32()
        } else {
            Ok(self.u16()? as u32)
        }
    }

    fn container(&mut self, tag: u8) -> Result<Json> {
        let is_array = tag & ARRAY_BIT != 0;
        let container_offset = self.pos - self.tree_base - 1;

        if tag & COUNT_BITS == COUNT_SHARED {
            return Err(Error::NotSupported(
                "shared-structure OSON containers".into(),
            ));
        }
        let count = match tag & COUNT_BITS {
            COUNT_U16 => self.u16()? as usize,
            COUNT_U32 => self.u32()? as usize,
            _ => self.u8()? as usize,
        };

        let offset_width = if tag & OFFSETS_U32_BIT != 0 { 4 } else { 2 };

        if is_array {
            let offsets_pos = self.pos;
            let mut out = Vec::with_capacity(count);
            for i in 0..count {
                self.pos = offsets_pos + i * offset_width;
                let off = self.read_offset(tag)? as usize;
                let target = if self.relative_offsets {
                    container_offset + off
                } else {
                    off
                };
                self.pos = self.tree_base + target;
                out.push(self.node()?);
            }
            Ok(Json::Array(out))
        } else {
            let ids_pos = self.pos;
            let offsets_pos = ids_pos + count * self.field_id_width;
            let mut out = serde_json::Map::new();
            for i in 0..count {
                self.pos = ids_pos + i * self.field_id_width;
                let id = match self.field_id_width {
                    1 => self.u8()? as usize,
                    2 => self.u16()? as usize,
                    _ => self.u32()? as usize,
                };
                let name = self
                    .field_names
                    .get(id.wrapping_sub(1))
                    .cloned()
                    .ok_or_else(|| Error::Conversion(format!("field id {id} out of range")))?;

                self.pos = offsets_pos + i * offset_width;
                let off = self.read_offset(tag)? as usize;
                let target = if self.relative_offsets {
                    container_offset + off
                } else {
                    off
                };
                self.pos = self.tree_base + target;
                out.insert(name, self.node()?);
            }
            Ok(Json::Object(out))
        }
    }
}

fn render_datetime(raw: &[u8]) -> Result<String> {
    let dt = crate::types::date::decode_datetime(raw)?;
    let mut out = format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        dt.year, dt.month, dt.day, dt.hour, dt.minute, dt.second
    );
    if dt.nanosecond > 0 {
        out.push_str(&format!(".{:09}", dt.nanosecond));
    }
    if dt.has_tz {
        let sign = if dt.tz_hour < 0 { '-' } else { '+' };
        out.push_str(&format!(
            "{}{:02}:{:02}",
            sign,
            dt.tz_hour.unsigned_abs(),
            dt.tz_minute.unsigned_abs()
        ));
    }
    Ok(out)
}

fn bernstein_hash(data: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in data {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

#[derive(Default)]
struct Encoder {
    field_names: Vec<String>,
    field_ids: HashMap<String, usize>,
}

impl Encoder {
    fn run(mut self, value: &Json) -> Result<Bytes> {
        self.collect_names(value);
        self.sort_dictionary();

        // Try narrow container offsets first; fall back to u32 when the
        // tree outgrows them.
        let tree = match self.encode_tree(value, false) {
            Ok(t) => t,
            Err(Error::Internal(_)) => self.encode_tree(value, true)?,
            Err(e) => return Err(e),
        };

        let is_scalar = !matches!(value, Json::Object(_) | Json::Array(_));

        let mut flags = FLAG_INLINE_LEAF;
        if is_scalar {
            flags |= FLAG_IS_SCALAR;
        } else {
            flags |= FLAG_HASH_ID_U8 | FLAG_TINY_NODES_STAT;
            if self.field_names.len() > 255 {
                flags |= FLAG_NUM_FNAMES_U16;
            }
        }
        if tree.len() > 0xFFFF {
            flags |= FLAG_TREE_SEG_U32;
        }

        let (hash_ids, name_offsets, names_seg) = self.dictionary_segments();
        if names_seg.len() > 0xFFFF {
            flags |= FLAG_FNAMES_SEG_U32;
        }

        let mut out = Vec::with_capacity(tree.len() + names_seg.len() + 32);
        out.extend_from_slice(&MAGIC);
        out.push(VERSION_SHORT_NAMES);
        out.extend_from_slice(&flags.to_be_bytes());

        if is_scalar {
            if flags & FLAG_TREE_SEG_U32 != 0 {
                out.extend_from_slice(&(tree.len() as u32).to_be_bytes());
            } else {
                out.extend_from_slice(&(tree.len() as u16).to_be_bytes());
            }
        } else {
            if flags & FLAG_NUM_FNAMES_U16 != 0 {
                out.extend_from_slice(&(self.field_names.len() as u16).to_be_bytes());
            } else {
                out.push(self.field_names.len() as u8);
            }
            if flags & FLAG_FNAMES_SEG_U32 != 0 {
                out.extend_from_slice(&(names_seg.len() as u32).to_be_bytes());
            } else {
                out.extend_from_slice(&(names_seg.len() as u16).to_be_bytes());
            }
            if flags & FLAG_TREE_SEG_U32 != 0 {
                out.extend_from_slice(&(tree.len() as u32).to_be_bytes());
            } else {
                out.extend_from_slice(&(tree.len() as u16).to_be_bytes());
            }
            out.extend_from_slice(&0u16.to_be_bytes()); // tiny nodes
            out.extend_from_slice(&hash_ids);
            out.extend_from_slice(&name_offsets);
            out.extend_from_slice(&names_seg);
        }

        out.extend_from_slice(&tree);
        Ok(Bytes::from(out))
    }

    fn collect_names(&mut self, value: &Json) {
        match value {
            Json::Object(map) => {
                for (key, child) in map {
                    if !self.field_ids.contains_key(key) {
                        self.field_ids.insert(key.clone(), 0);
                        self.field_names.push(key.clone());
                    }
                    self.collect_names(child);
                }
            }
            Json::Array(items) => {
                for item in items {
                    self.collect_names(item);
                }
            }
            _ => {}
        }
    }

    /// The dictionary is ordered by name hash then length; field ids are
    /// 1-based positions in that order.
    fn sort_dictionary(&mut self) {
        self.field_names.sort_by(|a, b| {
            let ha = bernstein_hash(a.as_bytes()) & 0xFF;
            let hb = bernstein_hash(b.as_bytes()) & 0xFF;
            ha.cmp(&hb)
                .then(a.len().cmp(&b.len()))
                .then(a.cmp(b))
        });
        for (i, name) in self.field_names.iter().enumerate() {
            self.field_ids.insert(name.clone(), i + 1);
        }
    }

    fn dictionary_segments(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut hash_ids = Vec::with_capacity(self.field_names.len());
        let mut offsets = Vec::with_capacity(self.field_names.len() * 2);
        let mut seg = Vec::new();
        for name in &self.field_names {
            hash_ids.push((bernstein_hash(name.as_bytes()) & 0xFF) as u8);
            offsets.extend_from_slice(&(seg.len() as u16).to_be_bytes());
            seg.push(name.len() as u8);
            seg.extend_from_slice(name.as_bytes());
        }
        (hash_ids, offsets, seg)
    }

    fn encode_tree(&self, value: &Json, wide_offsets: bool) -> Result<Vec<u8>> {
        let mut tree = Vec::new();
        self.encode_node(value, &mut tree, wide_offsets)?;
        if !wide_offsets && tree.len() > 0xFFFF {
            return Err(Error::Internal("tree needs wide offsets".into()));
        }
        Ok(tree)
    }

    fn encode_node(&self, value: &Json, tree: &mut Vec<u8>, wide: bool) -> Result<()> {
        match value {
            Json::Null => tree.push(NODE_NULL),
            Json::Bool(true) => tree.push(NODE_TRUE),
            Json::Bool(false) => tree.push(NODE_FALSE),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    let bytes = encode_number(&i.to_string())?;
                    tree.push(NODE_NUMBER_U8);
                    tree.push(bytes.len() as u8);
                    tree.extend_from_slice(&bytes);
                } else if let Some(f) = n.as_f64() {
                    tree.push(NODE_BINARY_DOUBLE);
                    tree.extend_from_slice(&crate::types::number::encode_binary_double(f));
                } else {
                    return Err(Error::Conversion(format!("JSON number {n} not encodable")));
                }
            }
            Json::String(s) => {
                let bytes = s.as_bytes();
                if bytes.len() <= 0xFF {
                    tree.push(NODE_STRING_U8);
                    tree.push(bytes.len() as u8);
                } else if bytes.len() <= 0xFFFF {
                    tree.push(NODE_STRING_U16);
                    tree.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                } else {
                    tree.push(NODE_STRING_U32);
                    tree.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                }
                tree.extend_from_slice(bytes);
            }
            Json::Array(items) => {
                self.encode_container(None, items, tree, wide)?;
            }
            Json::Object(map) => {
                let children: Vec<&Json> = map.values().collect();
                let ids: Vec<usize> = map
                    .keys()
                    .map(|k| *self.field_ids.get(k).expect("collected name"))
                    .collect();
                self.encode_container(Some(&ids), &children, tree, wide)?;
            }
        }
        Ok(())
    }

    fn encode_container(
        &self,
        field_ids: Option<&[usize]>,
        children: &[impl AsJsonRef],
        tree: &mut Vec<u8>,
        wide: bool,
    ) -> Result<()> {
        let count = children.len();
        let wide_ids = self.field_names.len() > 255;

        let mut tag = if field_ids.is_some() { NODE_OBJECT } else { NODE_ARRAY };
        if wide {
            tag |= OFFSETS_U32_BIT;
        }
        if count > 0xFFFF {
            tag |= COUNT_U32;
        } else if count > 0xFF {
            tag |= COUNT_U16;
        }
        tree.push(tag);

        match tag & COUNT_BITS {
            COUNT_U32 => tree.extend_from_slice(&(count as u32).to_be_bytes()),
            COUNT_U16 => tree.extend_from_slice(&(count as u16).to_be_bytes()),
            _ => tree.push(count as u8),
        }

        if let Some(ids) = field_ids {
            for &id in ids {
                if wide_ids {
                    tree.extend_from_slice(&(id as u16).to_be_bytes());
                } else {
                    tree.push(id as u8);
                }
            }
        }

        let offset_width = if wide { 4 } else { 2 };
        let table_pos = tree.len();
        tree.resize(table_pos + count * offset_width, 0);

        for (i, child) in children.iter().enumerate() {
            let at = tree.len();
            if !wide && at > 0xFFFF {
                return Err(Error::Internal("tree needs wide offsets".into()));
            }
            let slot = table_pos + i * offset_width;
            if wide {
                tree[slot..slot + 4].copy_from_slice(&(at as u32).to_be_bytes());
            } else {
                tree[slot..slot + 2].copy_from_slice(&(at as u16).to_be_bytes());
            }
            self.encode_node(child.as_json(), tree, wide)?;
        }
        Ok(())
    }
}

trait AsJsonRef {
    fn as_json(&self) -> &Json;
}

impl AsJsonRef for Json {
    fn as_json(&self) -> &Json {
        self
    }
}

impl AsJsonRef for &Json {
    fn as_json(&self) -> &Json {
        self
    }
}
