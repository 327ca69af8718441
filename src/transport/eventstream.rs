// total_len: u32 | headers_len: u32 | prelude_crc: u32 | headers | payload | message_crc: u32
// Integers are big-endian; both checksums are CRC-32 (IEEE).

use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} is outside the allowed range")]
    Length(u32),
    #[error("headers length {headers_len} does not fit in frame of {total_len} bytes")]
    HeadersLength { headers_len: u32, total_len: u32 },
    #[error("prelude checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    PreludeChecksum { expected: u32, actual: u32 },
    #[error("message checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    MessageChecksum { expected: u32, actual: u32 },
    #[error("header block is truncated")]
    TruncatedHeader,
    #[error("unknown header value type {0}")]
    UnknownHeaderType(u8),
    #[error("header text is not valid UTF-8")]
    InvalidUtf8,
    #[error("stream ended with {0} bytes of an incomplete frame")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<Header>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name == name)
            .and_then(|header| match &header.value {
                HeaderValue::String(value) => Some(value.as_str()),
                _ => None,
            })
    }
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buf[0..4]);
        let headers_len = read_u32(&self.buf[4..8]);
        let prelude_crc = read_u32(&self.buf[8..12]);

        let actual = crc32(&self.buf[0..8]);
        if actual != prelude_crc {
            return Err(FrameError::PreludeChecksum {
                expected: prelude_crc,
                actual,
            });
        }

        let total = total_len as usize;
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total) {
            return Err(FrameError::Length(total_len));
        }
        if headers_len as usize > total - MIN_FRAME_LEN {
            return Err(FrameError::HeadersLength {
                headers_len,
                total_len,
            });
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame_bytes: Vec<u8> = self.buf.drain(..total).collect();
        let message_crc = read_u32(&frame_bytes[total - CRC_LEN..]);
        let actual = crc32(&frame_bytes[..total - CRC_LEN]);
        if actual != message_crc {
            return Err(FrameError::MessageChecksum {
                expected: message_crc,
                actual,
            });
        }

        let headers_end = PRELUDE_LEN + headers_len as usize;
        let headers = parse_headers(&frame_bytes[PRELUDE_LEN..headers_end])?;
        let payload = frame_bytes[headers_end..total - CRC_LEN].to_vec();
        Ok(Some(Frame { headers, payload }))
    }

    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FrameError::TrailingBytes(self.buf.len()))
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.bytes.len() < len {
            return Err(FrameError::TruncatedHeader);
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, FrameError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }
}

fn parse_headers(bytes: &[u8]) -> Result<Vec<Header>, FrameError> {
    let mut cursor = Cursor { bytes };
    let mut headers = Vec::new();

    while !cursor.bytes.is_empty() {
        let name_len = cursor.take_u8()? as usize;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| FrameError::InvalidUtf8)?
            .to_string();

        let value = match cursor.take_u8()? {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(cursor.take_array()?)),
            3 => HeaderValue::Short(i16::from_be_bytes(cursor.take_array()?)),
            4 => HeaderValue::Int(i32::from_be_bytes(cursor.take_array()?)),
            5 => HeaderValue::Long(i64::from_be_bytes(cursor.take_array()?)),
            6 => {
                let len = cursor.take_u16()? as usize;
                HeaderValue::Bytes(cursor.take(len)?.to_vec())
            }
            7 => {
                let len = cursor.take_u16()? as usize;
                let text =
                    std::str::from_utf8(cursor.take(len)?).map_err(|_| FrameError::InvalidUtf8)?;
                HeaderValue::String(text.to_string())
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(cursor.take_array()?)),
            9 => HeaderValue::Uuid(cursor.take_array()?),
            other => return Err(FrameError::UnknownHeaderType(other)),
        };

        headers.push(Header { name, value });
    }

    Ok(headers)
}

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in bytes {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = (MIN_FRAME_LEN + header_bytes.len() + payload.len()) as u32;
    let mut frame = Vec::with_capacity(total_len as usize);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    let message_crc = crc32(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}
