//! Framing for a relaxed JSON Lines stream.
//!
//! Values are separated by newlines, but a newline inside an object, an array or a
//! string does not end the value, so pretty-printed JSON can be streamed as is.
//! Blank lines are skipped.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Largest single value we will buffer before giving up on the stream.
pub const DEFAULT_MAX_VALUE_LEN: usize = 1 << 20;

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Outcome of feeding one byte to the [`Scanner`].
#[derive(Debug, Eq, PartialEq)]
enum Step {
    /// Part of the current value.
    Keep,
    /// A newline outside of any object, array or string.
    Delimiter,
}

/// Tracks nesting and string state for the value being read.
#[derive(Debug, Default)]
struct Scanner {
    /// Expected closing bytes, innermost last
    closers: Vec<u8>,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    fn push(&mut self, byte: u8) -> io::Result<Step> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return Ok(Step::Keep);
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' => self.closers.push(b'}'),
            b'[' => self.closers.push(b']'),
            b'}' | b']' => match self.closers.pop() {
                Some(expected) if expected == byte => {}
                Some(expected) => {
                    return Err(invalid_data(format!(
                        "expected '{}' but found '{}'",
                        expected as char, byte as char
                    )));
                }
                None => {
                    return Err(invalid_data(format!(
                        "unbalanced '{}' at top level",
                        byte as char
                    )));
                }
            },
            b'\n' if self.closers.is_empty() => return Ok(Step::Delimiter),
            _ => {}
        }
        Ok(Step::Keep)
    }

    fn is_complete(&self) -> bool {
        self.closers.is_empty() && !self.in_string
    }
}

fn is_blank(buf: &[u8]) -> bool {
    buf.iter().all(u8::is_ascii_whitespace)
}

/// Reads one JSON value at a time from a relaxed JSON Lines stream.
pub struct JsonLinesReader<R> {
    reader: BufReader<R>,
    max_value_len: usize,
}

impl<R: AsyncRead + Unpin> JsonLinesReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_value_len(reader, DEFAULT_MAX_VALUE_LEN)
    }

    pub fn with_max_value_len(reader: R, max_value_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_value_len,
        }
    }

    /// Read the bytes of the next value.
    ///
    /// Returns `Ok(None)` on a clean EOF. Mismatched brackets, a value cut off by
    /// EOF, or a value longer than the limit are `InvalidData` errors, after which
    /// the stream should be abandoned.
    pub async fn next_value(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut scanner = Scanner::default();
        let mut buf = Vec::with_capacity(256);

        loop {
            let byte = match self.reader.read_u8().await {
                Ok(byte) => byte,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    if is_blank(&buf) {
                        return Ok(None);
                    }
                    if !scanner.is_complete() {
                        return Err(invalid_data(format!(
                            "stream ended inside a value: {}",
                            String::from_utf8_lossy(&buf)
                        )));
                    }
                    return Ok(Some(buf));
                }
                Err(err) => return Err(err),
            };

            match scanner.push(byte)? {
                Step::Delimiter if is_blank(&buf) => buf.clear(),
                Step::Delimiter => return Ok(Some(buf)),
                Step::Keep => {
                    buf.push(byte);
                    if buf.len() > self.max_value_len {
                        return Err(invalid_data(format!(
                            "value exceeds {} bytes",
                            self.max_value_len
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(data: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        let mut reader = JsonLinesReader::new(data);
        let mut values = Vec::new();
        while let Some(value) = reader.next_value().await? {
            values.push(value);
        }
        Ok(values)
    }

    #[tokio::test]
    async fn test_one_value_per_line() {
        let values = read_all(b"{\"a\": 1}\n[1, 2]\n{\"b\": {}}\n").await.unwrap();
        assert_eq!(
            values,
            vec![
                b"{\"a\": 1}".to_vec(),
                b"[1, 2]".to_vec(),
                b"{\"b\": {}}".to_vec()
            ]
        );
    }

    #[tokio::test]
    async fn test_pretty_printed_value() {
        let data = b"{\n  \"message\": \"disk full\",\n  \"tags\": [\n    \"a\"\n  ]\n}\n";
        let values = read_all(data).await.unwrap();
        assert_eq!(values.len(), 1);
        let parsed: serde_json::Value = serde_json::from_slice(&values[0]).unwrap();
        assert_eq!(parsed["message"], "disk full");
    }

    #[tokio::test]
    async fn test_blank_lines_and_crlf_are_skipped() {
        let values = read_all(b"\n\r\n{\"a\": 1}\r\n\n  \n").await.unwrap();
        assert_eq!(values, vec![b"{\"a\": 1}\r".to_vec()]);
        assert!(serde_json::from_slice::<serde_json::Value>(&values[0]).is_ok());

        assert!(read_all(b"").await.unwrap().is_empty());
        assert!(read_all(b"\n\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_value_without_newline() {
        let values = read_all(b"{\"a\": 1}\n{\"b\": 2}").await.unwrap();
        assert_eq!(values, vec![b"{\"a\": 1}".to_vec(), b"{\"b\": 2}".to_vec()]);
    }

    #[tokio::test]
    async fn test_brackets_inside_strings_are_ignored() {
        let data = b"{\"m\": \"closing } and ] and \\\" quote\"}\n";
        let values = read_all(data).await.unwrap();
        assert_eq!(values.len(), 1);
        let parsed: serde_json::Value = serde_json::from_slice(&values[0]).unwrap();
        assert_eq!(parsed["m"], "closing } and ] and \" quote");
    }

    #[tokio::test]
    async fn test_mismatched_brackets_are_errors() {
        let err = read_all(b"{\"a\": [1}\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = read_all(b"{\"a\": 1}}\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_value_is_an_error() {
        let err = read_all(b"{\"a\": 1}\n{\"b\": ").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_value_length_limit() {
        let data: &[u8] = b"{\"message\": \"this is far too long\"}\n";
        let mut reader = JsonLinesReader::with_max_value_len(data, 16);
        let err = reader.next_value().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut reader = JsonLinesReader::with_max_value_len(&b"{}\n"[..], 16);
        assert_eq!(reader.next_value().await.unwrap(), Some(b"{}".to_vec()));
    }
}
