//! Byte source with one byte of pushback.

use std::io::{self, Read};

/// Sequential reader over any [`io::Read`] with single-byte lookahead.
///
/// Every method that can hit the end of input reports it as `Ok(None)` (or a
/// short result) instead of an error, so the decoder can tell a clean end of
/// stream apart from truncation.
pub struct ByteReader<R> {
    reader: R,
    peeked: Option<u8>,
    consumed: usize,
}

impl<R: Read> ByteReader<R> {
    pub fn new(reader: R) -> Self {
        ByteReader {
            reader,
            peeked: None,
            consumed: 0,
        }
    }

    /// Reads the next byte, or `None` at end of input.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = match self.peeked.take() {
            Some(b) => Some(b),
            None => self.fill()?,
        };
        if byte.is_some() {
            self.consumed += 1;
        }
        Ok(byte)
    }

    /// Returns the next byte without consuming it.
    pub fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.fill()?;
        }
        Ok(self.peeked)
    }

    /// Pushes a byte returned by [`read_byte`](Self::read_byte) back onto the stream.
    ///
    /// Only one byte of pushback is held. Returns `false` and leaves the reader
    /// untouched if a byte is already pending or nothing has been consumed yet.
    pub fn unread_byte(&mut self, byte: u8) -> bool {
        if self.peeked.is_some() {
            return false;
        }
        let Some(consumed) = self.consumed.checked_sub(1) else {
            return false;
        };
        self.peeked = Some(byte);
        self.consumed = consumed;
        true
    }

    /// Reads up to `len` bytes. A result shorter than `len` means the input ended.
    ///
    /// Memory grows with the bytes actually read, not with `len`.
    pub fn read_up_to(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if len == 0 {
            return Ok(buf);
        }
        if let Some(b) = self.peeked.take() {
            buf.push(b);
        }
        let remaining = (len - buf.len()) as u64;
        let result = self.reader.by_ref().take(remaining).read_to_end(&mut buf);
        // Bytes handed over before a failure are gone from the source.
        self.consumed += buf.len();
        result?;
        Ok(buf)
    }

    /// Number of bytes handed out so far, net of pushback.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Returns the underlying reader. A pending pushback byte is lost.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn fill(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_pushback() {
        let mut reader = ByteReader::new(&b"ab"[..]);
        assert_eq!(reader.read_byte().unwrap(), Some(b'a'));
        assert!(reader.unread_byte(b'a'));
        assert_eq!(reader.consumed(), 0);
        assert_eq!(reader.peek_byte().unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().unwrap(), None);
        assert_eq!(reader.peek_byte().unwrap(), None);
        assert_eq!(reader.consumed(), 2);
    }

    #[test]
    fn test_read_up_to_includes_peeked_byte() {
        let mut reader = ByteReader::new(&b"hello"[..]);
        assert_eq!(reader.peek_byte().unwrap(), Some(b'h'));
        assert_eq!(reader.read_up_to(3).unwrap(), b"hel");
        assert_eq!(reader.consumed(), 3);
        assert_eq!(reader.read_byte().unwrap(), Some(b'l'));
    }

    #[test]
    fn test_read_up_to_short_at_eof() {
        let mut reader = ByteReader::new(&b"ab"[..]);
        assert_eq!(reader.read_up_to(1000).unwrap(), b"ab");
        assert_eq!(reader.consumed(), 2);
        assert!(reader.read_up_to(0).unwrap().is_empty());
    }

    #[test]
    fn test_unread_before_any_read_is_refused() {
        let mut reader = ByteReader::new(&b"ab"[..]);
        assert!(!reader.unread_byte(b'z'));
        assert_eq!(reader.consumed(), 0);
        assert_eq!(reader.read_byte().unwrap(), Some(b'a'));
    }

    #[test]
    fn test_second_unread_is_refused() {
        let mut reader = ByteReader::new(&b"ab"[..]);
        let a = reader.read_byte().unwrap().unwrap();
        let b = reader.read_byte().unwrap().unwrap();
        assert!(reader.unread_byte(b));
        assert!(!reader.unread_byte(a));
        assert_eq!(reader.consumed(), 1);
        assert_eq!(reader.read_byte().unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().unwrap(), None);
    }

    #[test]
    fn test_read_up_to_counts_peeked_byte_on_error() {
        struct FailAfterFirst {
            sent: bool,
        }

        impl Read for FailAfterFirst {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.sent {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
                }
                self.sent = true;
                buf[0] = b'x';
                Ok(1)
            }
        }

        let mut reader = ByteReader::new(FailAfterFirst { sent: false });
        assert_eq!(reader.peek_byte().unwrap(), Some(b'x'));
        assert!(reader.read_up_to(4).is_err());
        assert_eq!(reader.consumed(), 1);
    }
}
