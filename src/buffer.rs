use std::fmt;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_MAX_DEPTH, Decoder, Encoder, Result, Value};

/// Growable byte buffer for composing and draining bencode documents
///
/// Values are appended at the end with [`encode`](Buffer::encode) or
/// [`write_encoded`](Buffer::write_encoded) and taken from the front with
/// [`decode_value`](Buffer::decode_value). Only the unread bytes are visible
/// through [`as_bytes`](Buffer::as_bytes) and `Display`.
///
/// # Example
/// ```
/// use bencoding::{Buffer, Value};
///
/// let mut buf = Buffer::new();
/// buf.write_encoded(b"i3e");
/// buf.encode("hello").unwrap();
/// assert_eq!(buf.to_string(), "i3e5:hello");
///
/// assert_eq!(buf.decode_value().unwrap(), Some(Value::Integer(3)));
/// assert_eq!(buf.decode_value().unwrap(), Some(Value::string("hello")));
/// assert_eq!(buf.decode_value().unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    max_depth: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Buffer {
            data: Vec::new(),
            read_pos: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: Vec::with_capacity(capacity),
            ..Buffer::new()
        }
    }

    /// Nesting limit applied when decoding from this buffer.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Append an already encoded fragment verbatim. It is not parsed or validated.
    pub fn write_encoded(&mut self, fragment: impl AsRef<[u8]>) {
        let fragment = fragment.as_ref();
        tracing::trace!(len = fragment.len(), "appending pre-encoded fragment");
        self.data.extend_from_slice(fragment);
    }

    /// Encode `value` onto the end of the buffer. On error nothing is appended.
    pub fn encode<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let start = self.data.len();
        let result = Encoder::new(&mut self.data).encode(value);
        if result.is_err() {
            self.data.truncate(start);
        }
        result
    }

    /// Decode the next value from the front of the buffer, or `None` once all
    /// bytes have been consumed.
    ///
    /// Bytes read before an error stay consumed.
    pub fn decode<'de, T: Deserialize<'de>>(&mut self) -> Result<Option<T>> {
        let mut decoder =
            Decoder::new(&self.data[self.read_pos..]).with_max_depth(self.max_depth);
        let result = decoder.decode();
        self.read_pos += decoder.bytes_consumed();
        if self.read_pos == self.data.len() {
            self.data.clear();
            self.read_pos = 0;
        }
        result
    }

    pub fn decode_value(&mut self) -> Result<Option<Value>> {
        self.decode()
    }

    /// Unread bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Unread bytes, by value.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.drain(..self.read_pos);
        self.data
    }
}

// Byte strings need not be UTF-8, so the text view is lossy.
impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer {
            data,
            ..Buffer::new()
        }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Buffer::from(data.to_vec())
    }
}

impl From<&str> for Buffer {
    fn from(data: &str) -> Self {
        Buffer::from(data.as_bytes())
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.as_bytes().read(buf)?;
        self.read_pos += n;
        Ok(n)
    }
}
