use std::io::Read;

use serde::Deserialize;
use serde::de::{self, DeserializeSeed, IntoDeserializer, Visitor, value::StringDeserializer};

use crate::read::ByteReader;
use crate::{BencodeError, DICT_START, END, INTEGER_START, LIST_START, Result, STRING_SEPARATOR, Value};

/// Container nesting allowed by [`Decoder::new`] unless overridden.
pub const DEFAULT_MAX_DEPTH: usize = 64;

// "-9223372036854775808"
const MAX_INTEGER_LEN: usize = 20;

/// Bencode decoder
///
/// Reads one top-level value per call from any [`Read`] source. Reaching the
/// end of input before the first byte of a value is not an error: the decode
/// methods return `Ok(None)`, so a stream of concatenated values can be drained
/// in a loop.
///
/// # Example
/// ```
/// use bencoding::{Decoder, Value};
///
/// let mut decoder = Decoder::new(&b"i3e3:cow"[..]);
/// assert_eq!(decoder.decode_value().unwrap(), Some(Value::Integer(3)));
/// assert_eq!(decoder.decode_value().unwrap(), Some(Value::string("cow")));
/// assert_eq!(decoder.decode_value().unwrap(), None);
/// ```
pub struct Decoder<R: Read> {
    reader: ByteReader<R>,
    depth: usize,
    max_depth: usize,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Decoder {
            reader: ByteReader::new(reader),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit how many lists and dictionaries may be nested inside each other.
    /// Deeper input fails with [`BencodeError::NestingTooDeep`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Decode the next value, or `None` if the input is exhausted.
    pub fn decode<'de, T: Deserialize<'de>>(&mut self) -> Result<Option<T>> {
        self.depth = 0;
        if self.reader.peek_byte()?.is_none() {
            return Ok(None);
        }
        T::deserialize(&mut *self).map(Some)
    }

    pub fn decode_value(&mut self) -> Result<Option<Value>> {
        self.decode()
    }

    /// Iterate over the remaining top-level values. Iteration stops after the
    /// first error.
    pub fn values(&mut self) -> Values<'_, R> {
        Values {
            de: self,
            failed: false,
        }
    }

    /// Check that the input holds nothing after the values decoded so far.
    pub fn end(&mut self) -> Result<()> {
        if self.reader.peek_byte()?.is_some() {
            tracing::trace!(offset = self.reader.consumed(), "trailing bytes after value");
            return Err(BencodeError::TrailingData);
        }
        Ok(())
    }

    /// Bytes consumed from the source so far.
    pub fn bytes_consumed(&self) -> usize {
        self.reader.consumed()
    }

    /// Returns the underlying reader.
    ///
    /// A byte the decoder has peeked but not consumed is lost, for example the
    /// first trailing byte after [`end`](Self::end) reports
    /// [`BencodeError::TrailingData`]. Use [`bytes_consumed`](Self::bytes_consumed)
    /// to locate where decoding stopped.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.reader.read_byte()?)
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.reader.peek_byte()?)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            tracing::debug!(
                max_depth = self.max_depth,
                offset = self.reader.consumed(),
                "bencode nesting limit reached"
            );
            return Err(BencodeError::NestingTooDeep(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Integer body after the leading `i`, through the closing `e`.
    fn parse_integer(&mut self) -> Result<i64> {
        let mut body = Vec::with_capacity(MAX_INTEGER_LEN);
        loop {
            match self.next_byte()? {
                Some(END) => break,
                Some(b) if body.len() < MAX_INTEGER_LEN => body.push(b),
                _ => return Err(BencodeError::InvalidData),
            }
        }
        parse_canonical_integer(&body).ok_or(BencodeError::InvalidData)
    }

    /// Byte string whose first length digit has already been read.
    fn parse_bytes(&mut self, first: u8) -> Result<Vec<u8>> {
        let mut len = usize::from(first - b'0');
        loop {
            match self.next_byte()? {
                Some(STRING_SEPARATOR) => break,
                Some(b @ b'0'..=b'9') => {
                    if first == b'0' {
                        return Err(BencodeError::InvalidData);
                    }
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add(usize::from(b - b'0')))
                        .ok_or(BencodeError::InvalidData)?;
                }
                Some(_) => return Err(BencodeError::InvalidData),
                None => return Err(BencodeError::TruncatedString),
            }
        }

        let data = self.reader.read_up_to(len)?;
        if data.len() < len {
            return Err(BencodeError::TruncatedString);
        }
        Ok(data)
    }

    /// Consume the `e` closing a container whose visitor stopped before reaching it.
    fn expect_end(&mut self, eof: BencodeError) -> Result<()> {
        match self.next_byte()? {
            Some(END) => Ok(()),
            Some(_) => Err(BencodeError::InvalidData),
            None => Err(eof),
        }
    }
}

fn parse_canonical_integer(body: &[u8]) -> Option<i64> {
    let digits = body.strip_prefix(b"-").unwrap_or(body);
    let canonical = match digits {
        [] => false,
        // "-0" is not canonical
        [b'0'] => body.len() == 1,
        [b'0', ..] => false,
        _ => digits.iter().all(u8::is_ascii_digit),
    };
    if !canonical {
        return None;
    }
    std::str::from_utf8(body).ok()?.parse().ok()
}

impl<'de, R: Read> de::Deserializer<'de> for &mut Decoder<R> {
    type Error = BencodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.next_byte()? {
            Some(INTEGER_START) => {
                let val = self.parse_integer()?;
                visitor.visit_i64(val)
            }
            Some(b @ b'0'..=b'9') => {
                let buf = self.parse_bytes(b)?;
                visitor.visit_byte_buf(buf)
            }
            Some(LIST_START) => {
                self.enter()?;
                let mut access = ListAccess {
                    de: &mut *self,
                    done: false,
                };
                let value = visitor.visit_seq(&mut access)?;
                access.finish()?;
                self.leave();
                Ok(value)
            }
            Some(DICT_START) => {
                self.enter()?;
                let mut access = DictAccess {
                    de: &mut *self,
                    done: false,
                };
                let value = visitor.visit_map(&mut access)?;
                access.finish()?;
                self.leave();
                Ok(value)
            }
            // Includes a stray `e` and end of input where a value is required.
            _ => Err(BencodeError::InvalidData),
        }
    }

    // Text targets get a string when the bytes are UTF-8 and the raw bytes
    // otherwise, so the visitor reports the mismatch.
    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.peek()? {
            Some(b'0'..=b'9') => {
                let Some(first) = self.next_byte()? else {
                    return Err(BencodeError::InvalidData);
                };
                match String::from_utf8(self.parse_bytes(first)?) {
                    Ok(s) => visitor.visit_string(s),
                    Err(e) => visitor.visit_byte_buf(e.into_bytes()),
                }
            }
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_string(visitor)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_string(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.next_byte()? {
            // Unit variant: the bare variant name.
            Some(b @ b'0'..=b'9') => {
                let name = self.parse_bytes(b)?;
                let name = String::from_utf8(name).map_err(|_| BencodeError::InvalidData)?;
                let name: StringDeserializer<BencodeError> = name.into_deserializer();
                visitor.visit_enum(name)
            }
            // Any other variant: a single-entry dictionary keyed by the variant name.
            Some(DICT_START) => {
                self.enter()?;
                let value = visitor.visit_enum(VariantAccess { de: &mut *self })?;
                self.expect_end(BencodeError::InvalidData)?;
                self.leave();
                Ok(value)
            }
            _ => Err(BencodeError::InvalidData),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 u8 u16 u32 u64 f32 f64
        bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

struct ListAccess<'a, R: Read> {
    de: &'a mut Decoder<R>,
    done: bool,
}

impl<'a, R: Read> ListAccess<'a, R> {
    fn finish(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.de.expect_end(BencodeError::InvalidList)
    }
}

impl<'de, 'a, R: Read> de::SeqAccess<'de> for ListAccess<'a, R> {
    type Error = BencodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        if self.done {
            return Ok(None);
        }
        match self.de.peek()? {
            None => Err(BencodeError::InvalidList),
            Some(END) => {
                self.de.next_byte()?;
                self.done = true;
                Ok(None)
            }
            Some(_) => seed.deserialize(&mut *self.de).map(Some),
        }
    }
}

struct DictAccess<'a, R: Read> {
    de: &'a mut Decoder<R>,
    done: bool,
}

impl<'a, R: Read> DictAccess<'a, R> {
    fn finish(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.de.expect_end(BencodeError::InvalidData)
    }
}

impl<'de, 'a, R: Read> de::MapAccess<'de> for DictAccess<'a, R> {
    type Error = BencodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        if self.done {
            return Ok(None);
        }
        match self.de.peek()? {
            Some(END) => {
                self.de.next_byte()?;
                self.done = true;
                Ok(None)
            }
            // Keys are always byte strings.
            Some(b'0'..=b'9') => seed.deserialize(&mut *self.de).map(Some),
            _ => Err(BencodeError::InvalidData),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(&mut *self.de)
    }
}

struct VariantAccess<'a, R: Read> {
    de: &'a mut Decoder<R>,
}

impl<'de, 'a, R: Read> de::EnumAccess<'de> for VariantAccess<'a, R> {
    type Error = BencodeError;
    type Variant = Self;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self)> {
        match self.de.peek()? {
            Some(b'0'..=b'9') => {}
            _ => return Err(BencodeError::InvalidData),
        }
        let variant = seed.deserialize(&mut *self.de)?;
        Ok((variant, self))
    }
}

impl<'de, 'a, R: Read> de::VariantAccess<'de> for VariantAccess<'a, R> {
    type Error = BencodeError;

    fn unit_variant(self) -> Result<()> {
        Err(BencodeError::InvalidData)
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self.de)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.de, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.de, visitor)
    }
}

/// Iterator returned by [`Decoder::values`].
pub struct Values<'a, R: Read> {
    de: &'a mut Decoder<R>,
    failed: bool,
}

impl<'a, R: Read> Iterator for Values<'a, R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.de.decode_value() {
            Ok(value) => value.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_slice;
    use serde_bytes::ByteBuf;

    fn decode_one(input: &[u8]) -> Result<Option<Value>> {
        Decoder::new(input).decode_value()
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Peer {
        ip: String,
        port: u16,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Announce {
        interval: u32,
        #[serde(rename = "min interval")]
        min_interval: Option<u32>,
        peers: Vec<Peer>,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    enum Event {
        Started,
        Completed(u32),
        Moved(i64, i64),
        Stopped { uploaded: u64 },
    }

    #[test]
    fn test_integers() {
        assert_eq!(decode_one(b"i3e").unwrap(), Some(Value::Integer(3)));
        assert_eq!(decode_one(b"i-1e").unwrap(), Some(Value::Integer(-1)));
        assert_eq!(decode_one(b"i0e").unwrap(), Some(Value::Integer(0)));
        assert_eq!(
            decode_one(b"i-9223372036854775808e").unwrap(),
            Some(Value::Integer(i64::MIN))
        );
    }

    #[test]
    fn test_malformed_integers() {
        for input in [
            &b"ie"[..],
            b"i-e",
            b"i-0e",
            b"i03e",
            b"i+5e",
            b"i1.5e",
            b"i12",
            b"i9223372036854775808e",
            b"i111111111111111111111111e",
        ] {
            assert!(
                matches!(decode_one(input), Err(BencodeError::InvalidData)),
                "{:?} should be rejected",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_strings() {
        assert_eq!(decode_one(b"3:cow").unwrap(), Some(Value::string("cow")));
        assert_eq!(decode_one(b"0:").unwrap(), Some(Value::bytes(Vec::new())));
        assert_eq!(
            decode_one(b"4:\x00\xff:e").unwrap(),
            Some(Value::bytes(vec![0x00, 0xff, b':', b'e']))
        );
    }

    #[test]
    fn test_truncated_strings() {
        assert!(matches!(
            decode_one(b"5:abc"),
            Err(BencodeError::TruncatedString)
        ));
        assert!(matches!(decode_one(b"12"), Err(BencodeError::TruncatedString)));
        // A huge declared length must not be allocated up front.
        assert!(matches!(
            decode_one(b"4294967295:abc"),
            Err(BencodeError::TruncatedString)
        ));
    }

    #[test]
    fn test_malformed_lengths() {
        assert!(matches!(decode_one(b"03:abc"), Err(BencodeError::InvalidData)));
        assert!(matches!(decode_one(b"3x:abc"), Err(BencodeError::InvalidData)));
        assert!(matches!(
            decode_one(b"99999999999999999999999:a"),
            Err(BencodeError::InvalidData)
        ));
    }

    #[test]
    fn test_list() {
        let value = decode_one(b"l3:cow11:01234567891e").unwrap().unwrap();
        assert_eq!(
            value,
            Value::list([Value::string("cow"), Value::string("01234567891")])
        );
        assert_eq!(decode_one(b"le").unwrap(), Some(Value::List(Vec::new())));
    }

    #[test]
    fn test_unterminated_list() {
        assert!(matches!(decode_one(b"l3:cow"), Err(BencodeError::InvalidList)));
        assert!(matches!(decode_one(b"l"), Err(BencodeError::InvalidList)));
        assert!(matches!(
            decode_one(b"l5:cow"),
            Err(BencodeError::TruncatedString)
        ));
    }

    #[test]
    fn test_dict() {
        let value = decode_one(b"d3:cow3:doge").unwrap().unwrap();
        assert_eq!(value.get(b"cow"), Some(&Value::string("dog")));
    }

    #[test]
    fn test_dict_duplicate_keys_last_wins() {
        let value = decode_one(b"d1:ai1e1:ai2ee").unwrap().unwrap();
        assert_eq!(value.as_dict().map(|d| d.len()), Some(1));
        assert_eq!(value.get(b"a"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_dict_unsorted_wire_is_accepted() {
        let value = decode_one(b"d1:bi1e1:ai2ee").unwrap().unwrap();
        assert_eq!(value.get(b"a"), Some(&Value::Integer(2)));
        assert_eq!(value.get(b"b"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_malformed_dicts() {
        assert!(matches!(decode_one(b"d1:ai1e"), Err(BencodeError::InvalidData)));
        assert!(matches!(decode_one(b"d1:a"), Err(BencodeError::InvalidData)));
        assert!(matches!(decode_one(b"di1ei2ee"), Err(BencodeError::InvalidData)));
    }

    #[test]
    fn test_invalid_leading_bytes() {
        assert!(matches!(decode_one(b"x"), Err(BencodeError::InvalidData)));
        assert!(matches!(decode_one(b"e"), Err(BencodeError::InvalidData)));
        assert!(matches!(decode_one(b"-1"), Err(BencodeError::InvalidData)));
    }

    #[test]
    fn test_empty_input_is_end_of_stream() {
        assert_eq!(decode_one(b"").unwrap(), None);
    }

    #[test]
    fn test_drain_successive_values() {
        let mut decoder = Decoder::new(&b"i1e3:abcle"[..]);
        assert_eq!(decoder.decode_value().unwrap(), Some(Value::Integer(1)));
        assert_eq!(decoder.bytes_consumed(), 3);
        assert_eq!(decoder.decode_value().unwrap(), Some(Value::string("abc")));
        assert_eq!(decoder.decode_value().unwrap(), Some(Value::List(vec![])));
        assert_eq!(decoder.decode_value().unwrap(), None);
        assert_eq!(decoder.decode_value().unwrap(), None);
        assert!(decoder.end().is_ok());
    }

    #[test]
    fn test_into_inner_after_trailing_data() {
        let mut decoder = Decoder::new(&b"i1exyz"[..]);
        assert_eq!(decoder.decode_value().unwrap(), Some(Value::Integer(1)));
        assert!(matches!(decoder.end(), Err(BencodeError::TrailingData)));
        assert_eq!(decoder.bytes_consumed(), 3);
        // The peeked `x` stays with the decoder.
        assert_eq!(decoder.into_inner(), b"yz");
    }

    #[test]
    fn test_values_iterator_stops_after_error() {
        let mut decoder = Decoder::new(&b"i1ei2exi3e"[..]);
        let results: Vec<_> = decoder.values().collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &Value::Integer(1));
        assert_eq!(results[1].as_ref().unwrap(), &Value::Integer(2));
        assert!(matches!(results[2], Err(BencodeError::InvalidData)));
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| {
            let mut input = vec![b'l'; depth];
            input.extend(std::iter::repeat_n(b'e', depth));
            input
        };

        assert!(Decoder::new(&nested(64)[..]).decode_value().is_ok());
        assert!(matches!(
            Decoder::new(&nested(65)[..]).decode_value(),
            Err(BencodeError::NestingTooDeep(64))
        ));
        assert!(matches!(
            Decoder::new(&nested(3)[..]).with_max_depth(2).decode_value(),
            Err(BencodeError::NestingTooDeep(2))
        ));
        assert!(matches!(
            Decoder::new(&b"d1:ai1ee"[..]).with_max_depth(0).decode_value(),
            Err(BencodeError::NestingTooDeep(0))
        ));
    }

    #[test]
    fn test_adversarial_depth_does_not_overflow_stack() {
        let input = vec![b'l'; 1_000_000];
        assert!(matches!(
            Decoder::new(&input[..]).decode_value(),
            Err(BencodeError::NestingTooDeep(DEFAULT_MAX_DEPTH))
        ));
    }

    #[test]
    fn test_depth_resets_between_values() {
        let mut decoder = Decoder::new(&b"lleelleelleelle"[..]).with_max_depth(2);
        for _ in 0..3 {
            assert!(decoder.decode_value().unwrap().is_some());
        }
        assert!(matches!(decoder.decode_value(), Err(BencodeError::InvalidList)));
    }

    #[test]
    fn test_typed_struct() {
        let input = b"d8:completei5e8:intervali1800e5:peersld2:ip8:10.0.0.14:porti6881eeee";
        let announce: Announce = from_slice(input).unwrap();
        assert_eq!(
            announce,
            Announce {
                interval: 1800,
                min_interval: None,
                peers: vec![Peer {
                    ip: "10.0.0.1".to_string(),
                    port: 6881,
                }],
            }
        );
    }

    #[test]
    fn test_typed_option_present() {
        let input = b"d8:intervali1800e12:min intervali60e5:peerslee";
        let announce: Announce = from_slice(input).unwrap();
        assert_eq!(announce.min_interval, Some(60));
    }

    #[test]
    fn test_typed_bytes_and_text() {
        let bytes: ByteBuf = from_slice(b"3:\x01\x02\x03").unwrap();
        assert_eq!(bytes.into_vec(), vec![1, 2, 3]);

        let text: String = from_slice(b"5:hello").unwrap();
        assert_eq!(text, "hello");

        assert!(from_slice::<String>(b"2:\xff\xfe").is_err());
    }

    #[test]
    fn test_typed_integer_range() {
        assert_eq!(from_slice::<u8>(b"i255e").unwrap(), 255);
        assert!(from_slice::<u8>(b"i256e").is_err());
        assert!(from_slice::<u32>(b"i-1e").is_err());
    }

    #[test]
    fn test_typed_tuple_length_mismatch() {
        assert_eq!(from_slice::<(i64, i64)>(b"li1ei2ee").unwrap(), (1, 2));
        assert!(matches!(
            from_slice::<(i64, i64)>(b"li1ei2ei3ee"),
            Err(BencodeError::InvalidData)
        ));
    }

    #[test]
    fn test_typed_enum() {
        assert_eq!(from_slice::<Event>(b"7:Started").unwrap(), Event::Started);
        assert_eq!(
            from_slice::<Event>(b"d9:Completedi3ee").unwrap(),
            Event::Completed(3)
        );
        assert_eq!(
            from_slice::<Event>(b"d5:Movedli1ei-2eee").unwrap(),
            Event::Moved(1, -2)
        );
        assert_eq!(
            from_slice::<Event>(b"d7:Stoppedd8:uploadedi7eee").unwrap(),
            Event::Stopped { uploaded: 7 }
        );
        assert!(from_slice::<Event>(b"d7:Started9:Completede").is_err());
    }

    #[test]
    fn test_from_slice_rejects_trailing_data() {
        assert!(matches!(
            from_slice::<Value>(b"i1ei2e"),
            Err(BencodeError::TrailingData)
        ));
        assert!(matches!(from_slice::<Value>(b""), Err(BencodeError::InvalidData)));
    }
}
