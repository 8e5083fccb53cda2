use std::io::Write;

use serde::Serialize;
use serde::ser::{self, Impossible};

use crate::{BencodeError, DICT_START, END, LIST_START, Result};

/// Bencode encoder
///
/// Any `T: Serialize` can be encoded as long as it only uses integers, strings,
/// byte strings, sequences, maps and structs. Dictionaries are always emitted
/// with keys in ascending byte order, whatever order the source produced them in.
///
/// # Example
/// ```
/// use bencoding::Encoder;
/// use std::collections::HashMap;
///
/// let mut map = HashMap::new();
/// map.insert("b", 1);
/// map.insert("a", 2);
///
/// let mut buf = Vec::new();
/// Encoder::new(&mut buf).encode(&map).unwrap();
/// assert_eq!(buf, b"d1:ai2e1:bi1ee");
/// ```
pub struct Encoder<W: Write> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Encoder { writer }
    }

    pub fn encode<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut *self)
    }

    /// Append an already encoded fragment verbatim. The fragment is not validated.
    pub fn write_raw(&mut self, fragment: &[u8]) -> Result<()> {
        self.writer.write_all(fragment)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_integer(&mut self, v: i64) -> Result<()> {
        write!(self.writer, "i{}e", v)?;
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        write!(self.writer, "{}:", v.len())?;
        self.writer.write_all(v)?;
        Ok(())
    }
}

impl<'a, W: Write> ser::Serializer for &'a mut Encoder<W> {
    type Ok = ();
    type Error = BencodeError;
    type SerializeSeq = List<'a, W>;
    type SerializeTuple = List<'a, W>;
    type SerializeTupleStruct = List<'a, W>;
    type SerializeTupleVariant = List<'a, W>;
    type SerializeMap = Dict<'a, W>;
    type SerializeStruct = Dict<'a, W>;
    type SerializeStructVariant = Dict<'a, W>;

    fn serialize_bool(self, _v: bool) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.write_integer(v)
    }

    fn serialize_i128(self, _v: i128) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        let v = i64::try_from(v).map_err(|_| BencodeError::InvalidType)?;
        self.write_integer(v)
    }

    fn serialize_u128(self, _v: u128) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_f32(self, _v: f32) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_f64(self, _v: f64) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_char(self, v: char) -> Result<()> {
        let mut utf8 = [0u8; 4];
        self.write_bytes(v.encode_utf8(&mut utf8).as_bytes())
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.write_bytes(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        self.write_bytes(v)
    }

    // Bencode has no null. Fields that may be absent need
    // `#[serde(skip_serializing_if = "Option::is_none")]`.
    fn serialize_none(self) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        Err(BencodeError::InvalidType)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()> {
        self.writer.write_all(&[DICT_START])?;
        self.write_bytes(variant.as_bytes())?;
        value.serialize(&mut *self)?;
        self.writer.write_all(&[END])?;
        Ok(())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        self.writer.write_all(&[LIST_START])?;
        Ok(List {
            enc: self,
            terminator: b"e",
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        self.writer.write_all(&[DICT_START])?;
        self.write_bytes(variant.as_bytes())?;
        self.writer.write_all(&[LIST_START])?;
        Ok(List {
            enc: self,
            terminator: b"ee",
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(Dict {
            enc: self,
            entries: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
            variant: false,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<Self::SerializeStruct> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        self.writer.write_all(&[DICT_START])?;
        self.write_bytes(variant.as_bytes())?;
        Ok(Dict {
            enc: self,
            entries: Vec::with_capacity(len),
            pending_key: None,
            variant: true,
        })
    }
}

/// Elements stream straight to the writer; `terminator` closes the list and
/// any wrapping variant dictionary.
pub struct List<'a, W: Write> {
    enc: &'a mut Encoder<W>,
    terminator: &'static [u8],
}

impl<'a, W: Write> List<'a, W> {
    fn element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut *self.enc)
    }

    fn finish(self) -> Result<()> {
        self.enc.writer.write_all(self.terminator)?;
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeSeq for List<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, W: Write> ser::SerializeTuple for List<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, W: Write> ser::SerializeTupleStruct for List<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, W: Write> ser::SerializeTupleVariant for List<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.element(value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

/// Dictionary entries are buffered until `end` so they can be written in key order.
pub struct Dict<'a, W: Write> {
    enc: &'a mut Encoder<W>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pending_key: Option<Vec<u8>>,
    variant: bool,
}

impl<'a, W: Write> Dict<'a, W> {
    // Each nesting level copies its children's bytes once more, so nested
    // dictionaries cost O(size * depth) in copying.
    fn entry<T: ?Sized + Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let mut encoded = Vec::new();
        value.serialize(&mut Encoder::new(&mut encoded))?;
        self.entries.push((key, encoded));
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        // Reverse first so the stable sort puts the last write of a duplicate key
        // ahead of earlier ones, then keep only that one.
        self.entries.reverse();
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.entries.dedup_by(|later, earlier| later.0 == earlier.0);

        self.enc.writer.write_all(&[DICT_START])?;
        for (key, value) in &self.entries {
            self.enc.write_bytes(key)?;
            self.enc.writer.write_all(value)?;
        }
        self.enc.writer.write_all(&[END])?;
        if self.variant {
            self.enc.writer.write_all(&[END])?;
        }
        Ok(())
    }
}

impl<'a, W: Write> ser::SerializeMap for Dict<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key.serialize(MapKeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| BencodeError::Serde("map value without a key".to_string()))?;
        self.entry(key, value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, W: Write> ser::SerializeStruct for Dict<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.entry(key.as_bytes().to_vec(), value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

impl<'a, W: Write> ser::SerializeStructVariant for Dict<'a, W> {
    type Ok = ();
    type Error = BencodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.entry(key.as_bytes().to_vec(), value)
    }

    fn end(self) -> Result<()> {
        self.finish()
    }
}

/// Serializes a dictionary key to its raw bytes; only string-like keys are accepted.
struct MapKeySerializer;

impl ser::Serializer for MapKeySerializer {
    type Ok = Vec<u8>;
    type Error = BencodeError;
    type SerializeSeq = Impossible<Vec<u8>, BencodeError>;
    type SerializeTuple = Impossible<Vec<u8>, BencodeError>;
    type SerializeTupleStruct = Impossible<Vec<u8>, BencodeError>;
    type SerializeTupleVariant = Impossible<Vec<u8>, BencodeError>;
    type SerializeMap = Impossible<Vec<u8>, BencodeError>;
    type SerializeStruct = Impossible<Vec<u8>, BencodeError>;
    type SerializeStructVariant = Impossible<Vec<u8>, BencodeError>;

    fn serialize_str(self, v: &str) -> Result<Vec<u8>> {
        Ok(v.as_bytes().to_vec())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>> {
        Ok(v.to_vec())
    }

    fn serialize_char(self, v: char) -> Result<Vec<u8>> {
        Ok(v.to_string().into_bytes())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Vec<u8>> {
        Ok(variant.as_bytes().to_vec())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Vec<u8>> {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_i8(self, _v: i8) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_i16(self, _v: i16) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_i32(self, _v: i32) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_i64(self, _v: i64) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_u8(self, _v: u8) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_u16(self, _v: u16) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_u32(self, _v: u32) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_u64(self, _v: u64) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_f32(self, _v: f32) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_f64(self, _v: f64) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_none(self) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _value: &T) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_unit(self) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(BencodeError::InvalidMapKey)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(BencodeError::InvalidMapKey)
    }
}
