use bytes::{Buf, BufMut, BytesMut};

use super::{get_str, need, put_str, WireError, WireResult, WireType, WireValue};
use crate::error::ServerMessage;

const TOKEN_COLMETADATA: u8 = 0x81;
const TOKEN_PARAMMETADATA: u8 = 0x82;
const TOKEN_ERROR: u8 = 0xaa;
const TOKEN_INFO: u8 = 0xab;
const TOKEN_ROW: u8 = 0xd1;
const TOKEN_ENVCHANGE: u8 = 0xe3;
const TOKEN_DONE: u8 = 0xfd;

/// Token header: type byte plus little-endian payload length
pub(crate) const HEADER_LEN: usize = 5;

/// Result column as described by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: WireType,
    pub nullable: bool,
}

/// Parameter as described by the backend's compiled plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub ty: WireType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoneStatus {
    /// Another result follows in the same response
    pub more: bool,
    /// The statement failed; preceding error tokens describe why
    pub error: bool,
    /// Number of rows affected, when the backend knows it
    pub row_count: Option<u64>,
}

/// Transaction state changes reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvChange {
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    ColMetadata(Vec<ColumnDef>),
    ParamMetadata(Vec<ParamDef>),
    Row(Vec<WireValue>),
    Done(DoneStatus),
    Error(ServerMessage),
    Info(ServerMessage),
    EnvChange(EnvChange),
}

impl Token {
    fn kind(&self) -> u8 {
        match self {
            Token::ColMetadata(_) => TOKEN_COLMETADATA,
            Token::ParamMetadata(_) => TOKEN_PARAMMETADATA,
            Token::Row(_) => TOKEN_ROW,
            Token::Done(_) => TOKEN_DONE,
            Token::Error(_) => TOKEN_ERROR,
            Token::Info(_) => TOKEN_INFO,
            Token::EnvChange(_) => TOKEN_ENVCHANGE,
        }
    }

    /// Append the framed token to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut payload = BytesMut::new();
        match self {
            Token::ColMetadata(columns) => {
                payload.put_u16_le(columns.len() as u16);
                for column in columns {
                    put_str(&mut payload, &column.name);
                    column.ty.encode(&mut payload);
                    payload.put_u8(column.nullable as u8);
                }
            }
            Token::ParamMetadata(params) => {
                payload.put_u16_le(params.len() as u16);
                for param in params {
                    param.ty.encode(&mut payload);
                    payload.put_u8(param.nullable as u8);
                }
            }
            Token::Row(values) => {
                payload.put_u16_le(values.len() as u16);
                for value in values {
                    value.encode(&mut payload);
                }
            }
            Token::Done(status) => {
                let flags = (status.more as u8)
                    | ((status.row_count.is_some() as u8) << 1)
                    | ((status.error as u8) << 2);
                payload.put_u8(flags);
                payload.put_u64_le(status.row_count.unwrap_or(0));
            }
            Token::Error(message) | Token::Info(message) => {
                payload.put_i32_le(message.number);
                payload.put_u8(message.state);
                payload.put_u8(message.class);
                put_str(&mut payload, &message.message);
            }
            Token::EnvChange(change) => payload.put_u8(match change {
                EnvChange::BeginTransaction => 1,
                EnvChange::CommitTransaction => 2,
                EnvChange::RollbackTransaction => 3,
            }),
        }
        dst.put_u8(self.kind());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
    }

    /// Decode one framed token.
    ///
    /// Returns `Ok(None)` without consuming anything when `src` does not yet
    /// hold the whole frame.
    pub fn decode(src: &mut &[u8]) -> WireResult<Option<Token>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = src[0];
        let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let mut payload = &src[HEADER_LEN..HEADER_LEN + len];
        let token = Self::decode_payload(kind, &mut payload)?;
        if !payload.is_empty() {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after token 0x{kind:02x}",
                payload.len()
            )));
        }
        src.advance(HEADER_LEN + len);
        Ok(Some(token))
    }

    fn decode_payload(kind: u8, src: &mut &[u8]) -> WireResult<Token> {
        Ok(match kind {
            TOKEN_COLMETADATA => {
                need(src, 2)?;
                let count = src.get_u16_le();
                let mut columns = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = get_str(src)?;
                    let ty = WireType::decode(src)?;
                    need(src, 1)?;
                    columns.push(ColumnDef {
                        name,
                        ty,
                        nullable: src.get_u8() != 0,
                    });
                }
                Token::ColMetadata(columns)
            }
            TOKEN_PARAMMETADATA => {
                need(src, 2)?;
                let count = src.get_u16_le();
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let ty = WireType::decode(src)?;
                    need(src, 1)?;
                    params.push(ParamDef {
                        ty,
                        nullable: src.get_u8() != 0,
                    });
                }
                Token::ParamMetadata(params)
            }
            TOKEN_ROW => {
                need(src, 2)?;
                let count = src.get_u16_le();
                let values = (0..count)
                    .map(|_| WireValue::decode(src))
                    .collect::<WireResult<Vec<_>>>()?;
                Token::Row(values)
            }
            TOKEN_DONE => {
                need(src, 9)?;
                let flags = src.get_u8();
                let count = src.get_u64_le();
                Token::Done(DoneStatus {
                    more: flags & 0x01 != 0,
                    row_count: (flags & 0x02 != 0).then_some(count),
                    error: flags & 0x04 != 0,
                })
            }
            TOKEN_ERROR | TOKEN_INFO => {
                need(src, 6)?;
                let number = src.get_i32_le();
                let state = src.get_u8();
                let class = src.get_u8();
                let message = ServerMessage {
                    number,
                    state,
                    class,
                    message: get_str(src)?,
                };
                if kind == TOKEN_ERROR {
                    Token::Error(message)
                } else {
                    Token::Info(message)
                }
            }
            TOKEN_ENVCHANGE => {
                need(src, 1)?;
                Token::EnvChange(match src.get_u8() {
                    1 => EnvChange::BeginTransaction,
                    2 => EnvChange::CommitTransaction,
                    3 => EnvChange::RollbackTransaction,
                    other => {
                        return Err(WireError::Malformed(format!(
                            "unknown environment change {other}"
                        )));
                    }
                })
            }
            other => return Err(WireError::UnknownToken(other)),
        })
    }
}
