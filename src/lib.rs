//! # Bencoding
//!
//! A bencode encoder/decoder producing canonical output.
//!
//! ## Format
//! | Construct | Encoding | Example |
//! |---|---|---|
//! | Integer | `i<decimal>e` | `i-1e` |
//! | Byte string | `<length>:<bytes>` | `5:hello` |
//! | List | `l<items>e` | `l3:cowi3ee` |
//! | Dictionary | `d<key><value>...e`, keys in ascending byte order | `d1:ai2e1:bi1ee` |
//!
//! ## Features
//! - Dynamic [`Value`] type covering the four bencode kinds
//! - serde integration: any `Serialize`/`Deserialize` type made of integers,
//!   strings, sequences, maps and structs maps onto bencode
//! - Dictionaries are always encoded with sorted keys, so encoding the same
//!   value always yields the same bytes
//! - Types bencode cannot represent (bool, floats, unit, `None`) fail with
//!   [`BencodeError::InvalidType`]; non-string map keys fail with
//!   [`BencodeError::InvalidMapKey`]. Nothing is ever silently substituted.
//! - Streaming decode of concatenated values: reaching the end of input between
//!   values yields `Ok(None)`, not an error
//! - Nesting depth limit for untrusted input ([`DEFAULT_MAX_DEPTH`])
//!
//! Use `serde_bytes::ByteBuf` or `#[serde(with = "serde_bytes")]` for binary
//! payloads; a plain `Vec<u8>` encodes as a list of integers.
//!
//! ## Example
//! ```rust
//! use bencoding::{from_slice, to_vec, Buffer, Value};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct File {
//!     path: String,
//!     length: u64,
//! }
//!
//! let file = File { path: "a.txt".into(), length: 12 };
//! let bytes = to_vec(&file).unwrap();
//! assert_eq!(bytes, b"d6:lengthi12e4:path5:a.txte");
//! assert_eq!(from_slice::<File>(&bytes).unwrap(), file);
//!
//! // Drain several values from one buffer
//! let mut buf = Buffer::from("i1e3:two");
//! assert_eq!(buf.decode_value().unwrap(), Some(Value::Integer(1)));
//! assert_eq!(buf.decode_value().unwrap(), Some(Value::string("two")));
//! assert_eq!(buf.decode_value().unwrap(), None);
//! ```

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

mod buffer;
mod de;
pub mod error;
pub mod read;
mod ser;
pub mod value;

pub use buffer::Buffer;
pub use de::{DEFAULT_MAX_DEPTH, Decoder, Values};
pub use error::BencodeError;
pub use ser::Encoder;
pub use value::Value;

// Wire tokens
const INTEGER_START: u8 = b'i';
const LIST_START: u8 = b'l';
const DICT_START: u8 = b'd';
const END: u8 = b'e';
const STRING_SEPARATOR: u8 = b':';

type Result<T> = std::result::Result<T, BencodeError>;

// Convenience functions
pub fn to_vec<T: ?Sized + Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    encoder.encode(value)?;
    Ok(buf)
}

pub fn to_writer<W: Write, T: ?Sized + Serialize>(writer: W, value: &T) -> Result<()> {
    Encoder::new(writer).encode(value)
}

/// Decode exactly one value from `slice`.
///
/// Empty input is [`BencodeError::InvalidData`]; bytes after the value are
/// [`BencodeError::TrailingData`]. Use [`Decoder`] to read a stream of values.
pub fn from_slice<'de, T: Deserialize<'de>>(slice: &[u8]) -> Result<T> {
    from_reader(slice)
}

/// Decode exactly one value from `reader`, which must then be exhausted.
pub fn from_reader<'de, R: Read, T: Deserialize<'de>>(reader: R) -> Result<T> {
    let mut decoder = Decoder::new(reader);
    let value = decoder.decode()?.ok_or(BencodeError::InvalidData)?;
    decoder.end()?;
    Ok(value)
}
