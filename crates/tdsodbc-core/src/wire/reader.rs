use bytes::{Buf, BytesMut};

use super::{Token, WireError};
use crate::error::{OdbcError, Result};
use crate::session::ResponseStream;

/// Incremental token decoder over a response stream.
///
/// Tokens may straddle packet boundaries; the reader buffers partial frames
/// until the rest arrives.
#[derive(Debug)]
pub struct TokenReader {
    stream: ResponseStream,
    buffer: BytesMut,
    exhausted: bool,
}

impl TokenReader {
    pub fn new(stream: ResponseStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Next token, or `None` once the response has been fully consumed
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let mut src = &self.buffer[..];
            let before = src.len();
            if let Some(token) = Token::decode(&mut src)? {
                let consumed = before - src.len();
                self.buffer.advance(consumed);
                return Ok(Some(token));
            }
            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(OdbcError::Wire(WireError::Truncated {
                    needed: self.buffer.len() + 1,
                    available: self.buffer.len(),
                }));
            }
            match self.stream.next_packet() {
                Some(packet) => self.buffer.extend_from_slice(&packet?),
                None => self.exhausted = true,
            }
        }
    }

    /// Consume and drop everything left in the response
    pub fn drain(&mut self) -> Result<()> {
        while self.next_token()?.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TransportError;
    use crate::wire::{DoneStatus, WireValue};
    use bytes::Bytes;

    fn encoded(tokens: &[Token]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for token in tokens {
            token.encode(&mut buf);
        }
        buf.to_vec()
    }

    #[test]
    fn test_tokens_split_across_packets() {
        let tokens = vec![
            Token::Row(vec![WireValue::I32(7)]),
            Token::Done(DoneStatus {
                row_count: Some(1),
                ..Default::default()
            }),
        ];
        let bytes = encoded(&tokens);
        let packets: Vec<Bytes> = bytes.chunks(3).map(Bytes::copy_from_slice).collect();

        let mut reader = TokenReader::new(ResponseStream::from_packets(packets));
        assert_eq!(reader.next_token().unwrap(), Some(tokens[0].clone()));
        assert_eq!(reader.next_token().unwrap(), Some(tokens[1].clone()));
        assert_eq!(reader.next_token().unwrap(), None);
        assert_eq!(reader.next_token().unwrap(), None);
    }

    #[test]
    fn test_truncated_response_is_a_wire_error() {
        let bytes = encoded(&[Token::Done(DoneStatus::default())]);
        let packets = vec![Bytes::copy_from_slice(&bytes[..bytes.len() - 2])];
        let mut reader = TokenReader::new(ResponseStream::from_packets(packets));
        let err = reader.next_token().unwrap_err();
        assert!(err.is_link_failure());
    }

    #[test]
    fn test_transport_failure_mid_stream() {
        let bytes = Bytes::from(encoded(&[Token::Row(vec![WireValue::Null])]));
        let packets = vec![Ok(bytes), Err(TransportError::Closed)];
        let mut reader = TokenReader::new(ResponseStream::new(packets.into_iter()));
        assert!(reader.next_token().unwrap().is_some());
        let err = reader.next_token().unwrap_err();
        assert!(matches!(err, OdbcError::Transport(TransportError::Closed)));
    }
}
