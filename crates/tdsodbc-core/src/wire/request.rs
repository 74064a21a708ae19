use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{get_str, need, put_str, WireError, WireResult, WireType, WireValue};

const REQUEST_BATCH: u8 = 0x01;
const REQUEST_PREPARE: u8 = 0x02;
const REQUEST_EXECUTE: u8 = 0x03;

/// Positional parameter value with its declared type
#[derive(Debug, Clone, PartialEq)]
pub struct WireParam {
    pub ty: WireType,
    pub value: WireValue,
}

/// A request sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Plain SQL text, possibly several statements
    Batch { text: String },
    /// Compile `text` and describe its parameters and result columns
    Prepare { text: String },
    /// Execute `text` with positional `?` parameters
    Execute { text: String, params: Vec<WireParam> },
}

impl Request {
    pub fn text(&self) -> &str {
        match self {
            Request::Batch { text } | Request::Prepare { text } | Request::Execute { text, .. } => {
                text
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        match self {
            Request::Batch { text } => {
                dst.put_u8(REQUEST_BATCH);
                put_str(&mut dst, text);
            }
            Request::Prepare { text } => {
                dst.put_u8(REQUEST_PREPARE);
                put_str(&mut dst, text);
            }
            Request::Execute { text, params } => {
                dst.put_u8(REQUEST_EXECUTE);
                put_str(&mut dst, text);
                dst.put_u16_le(params.len() as u16);
                for param in params {
                    param.ty.encode(&mut dst);
                    param.value.encode(&mut dst);
                }
            }
        }
        dst.freeze()
    }

    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let mut src = bytes;
        need(src, 1)?;
        let kind = src.get_u8();
        let request = match kind {
            REQUEST_BATCH => Request::Batch {
                text: get_str(&mut src)?,
            },
            REQUEST_PREPARE => Request::Prepare {
                text: get_str(&mut src)?,
            },
            REQUEST_EXECUTE => {
                let text = get_str(&mut src)?;
                need(src, 2)?;
                let count = src.get_u16_le();
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let ty = WireType::decode(&mut src)?;
                    let value = WireValue::decode(&mut src)?;
                    params.push(WireParam { ty, value });
                }
                Request::Execute { text, params }
            }
            other => return Err(WireError::UnknownRequest(other)),
        };
        if !src.is_empty() {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after request",
                src.len()
            )));
        }
        Ok(request)
    }
}
