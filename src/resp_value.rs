use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

const TERMINATOR: &[u8] = b"\r\n";

/// Frames larger than this are rejected instead of buffered.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
/// Upper bound on the bytes a single undecoded request may occupy.
pub const MAX_REQUEST_LEN: usize = 4 * MAX_FRAME_LEN;
const MAX_ARRAY_LEN: usize = 1024;
const MAX_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespError {
    /// More bytes are needed before the frame can be decoded.
    #[error("incomplete frame")]
    Incomplete,
    #[error("protocol error: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> RespError {
    RespError::Invalid(message.into())
}

/// The RESP2 subset the reveal server speaks.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RespValue<'data> {
    SimpleString(Cow<'data, str>),
    SimpleError(Cow<'data, str>),
    Integer(i64),
    BulkString(Cow<'data, str>),
    NullBulkString,
    Array(Vec<RespValue<'data>>),
    NullArray,
}

impl<'data> RespValue<'data> {
    pub fn simple(s: impl Into<Cow<'data, str>>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<Cow<'data, str>>) -> Self {
        RespValue::SimpleError(s.into())
    }

    pub fn bulk(s: impl Into<Cow<'data, str>>) -> Self {
        RespValue::BulkString(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) | RespValue::BulkString(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put(s.as_bytes());
            }
            RespValue::SimpleError(s) => {
                buf.put_u8(b'-');
                // Line breaks would end the frame early.
                buf.put(s.replace(['\r', '\n'], " ").as_bytes());
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.put(n.to_string().as_bytes());
            }
            RespValue::BulkString(s) => {
                buf.put_u8(b'$');
                buf.put(s.len().to_string().as_bytes());
                buf.put(TERMINATOR);
                buf.put(s.as_bytes());
            }
            RespValue::NullBulkString => buf.put(&b"$-1"[..]),
            RespValue::NullArray => buf.put(&b"*-1"[..]),
            RespValue::Array(elements) => {
                buf.put_u8(b'*');
                buf.put(elements.len().to_string().as_bytes());
                buf.put(TERMINATOR);
                for element in elements {
                    element.serialize(buf);
                }
                // Elements carry their own terminators.
                return;
            }
        }
        buf.put(TERMINATOR);
    }

    /// Decode one value from the front of `data`, returning it and the
    /// number of bytes consumed. Lines that don't start with a RESP tag are
    /// read as inline commands (`REVEAL 42\r\n`), the way `nc` sends them.
    pub fn deserialize(data: &'data [u8]) -> Result<(Self, usize), RespError> {
        Self::deserialize_at(data, 0)
    }

    fn deserialize_at(data: &'data [u8], depth: usize) -> Result<(Self, usize), RespError> {
        if data.is_empty() {
            return Err(RespError::Incomplete);
        }
        match data[0] {
            b'+' => {
                let (line, consumed) = read_line(data, 1)?;
                Ok((RespValue::SimpleString(Cow::Borrowed(utf8(line)?)), consumed))
            }
            b'-' => {
                let (line, consumed) = read_line(data, 1)?;
                Ok((RespValue::SimpleError(Cow::Borrowed(utf8(line)?)), consumed))
            }
            b':' => {
                let (line, consumed) = read_line(data, 1)?;
                let n = utf8(line)?
                    .parse::<i64>()
                    .map_err(|_| invalid("invalid integer"))?;
                Ok((RespValue::Integer(n), consumed))
            }
            b'$' => {
                let (line, header_len) = read_line(data, 1)?;
                let Some(len) = parse_length(line, MAX_FRAME_LEN)? else {
                    return Ok((RespValue::NullBulkString, header_len));
                };
                let end = header_len + len;
                if data.len() < end + TERMINATOR.len() {
                    return Err(RespError::Incomplete);
                }
                if &data[end..end + TERMINATOR.len()] != TERMINATOR {
                    return Err(invalid("bulk string length mismatch"));
                }
                let s = utf8(&data[header_len..end])?;
                Ok((RespValue::BulkString(Cow::Borrowed(s)), end + TERMINATOR.len()))
            }
            b'*' => {
                if depth >= MAX_DEPTH {
                    return Err(invalid("arrays nested too deep"));
                }
                let (line, header_len) = read_line(data, 1)?;
                let Some(count) = parse_length(line, MAX_ARRAY_LEN)? else {
                    return Ok((RespValue::NullArray, header_len));
                };
                let mut consumed = header_len;
                let mut elements = Vec::with_capacity(count);
                for _ in 0..count {
                    let (element, used) = RespValue::deserialize_at(&data[consumed..], depth + 1)?;
                    elements.push(element);
                    consumed += used;
                }
                Ok((RespValue::Array(elements), consumed))
            }
            _ => {
                let (line, consumed) = read_line(data, 0)?;
                let words = utf8(line)?
                    .split_ascii_whitespace()
                    .map(|word| RespValue::BulkString(Cow::Borrowed(word)))
                    .collect();
                Ok((RespValue::Array(words), consumed))
            }
        }
    }
}

/// Returns the line starting at `start` (without its terminator) and the
/// offset just past the terminator.
fn read_line(data: &[u8], start: usize) -> Result<(&[u8], usize), RespError> {
    match find_terminator(&data[start..]) {
        Some(index) => Ok((&data[start..start + index], start + index + TERMINATOR.len())),
        None if data.len() > MAX_FRAME_LEN => Err(invalid("line too long")),
        None => Err(RespError::Incomplete),
    }
}

/// `None` for the `-1` null marker.
fn parse_length(line: &[u8], max: usize) -> Result<Option<usize>, RespError> {
    let digits = utf8(line)?;
    if digits == "-1" {
        return Ok(None);
    }
    let len = digits
        .parse::<usize>()
        .map_err(|_| invalid(format!("invalid length {:?}", digits)))?;
    if len > max {
        return Err(invalid(format!("length {} exceeds limit {}", len, max)));
    }
    Ok(Some(len))
}

fn utf8(bytes: &[u8]) -> Result<&str, RespError> {
    std::str::from_utf8(bytes).map_err(|_| invalid("invalid utf-8"))
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}
