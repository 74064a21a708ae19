//! Transport collaborator contract: a blocking request/response session

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::wire::Token;

/// Failure of the link to the backend. Always fatal to the connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Link(String),
}

/// Handle for interrupting the request in flight on a session.
///
/// Safe to call from any thread; calling it with nothing in flight is a no-op.
pub trait CancelHandle: Send + Sync {
    fn cancel(&self);
}

type Packets = Box<dyn Iterator<Item = Result<Bytes, TransportError>> + Send>;

/// Packets making up the response to one request
pub struct ResponseStream {
    packets: Packets,
}

impl ResponseStream {
    pub fn new<I>(packets: I) -> Self
    where
        I: Iterator<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self {
            packets: Box::new(packets),
        }
    }

    /// Response whose packets are already in memory
    pub fn from_packets(packets: impl IntoIterator<Item = Bytes>) -> Self {
        let packets: Vec<Bytes> = packets.into_iter().collect();
        Self::new(packets.into_iter().map(Ok))
    }

    /// Encode `tokens` and cut the result into packets of at most `packet_size` bytes
    pub fn from_tokens(tokens: &[Token], packet_size: usize) -> Self {
        let mut buf = BytesMut::new();
        for token in tokens {
            token.encode(&mut buf);
        }
        let packet_size = packet_size.max(1);
        let mut packets = Vec::with_capacity(buf.len() / packet_size + 1);
        while buf.len() > packet_size {
            packets.push(buf.split_to(packet_size).freeze());
        }
        if !buf.is_empty() {
            packets.push(buf.freeze());
        }
        Self::from_packets(packets)
    }

    pub fn empty() -> Self {
        Self::from_packets(Vec::new())
    }

    pub fn next_packet(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.packets.next()
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// An authenticated session with the backend
pub trait Session: Send {
    /// Send one encoded request and return its response packets
    fn send_request(&mut self, request: Bytes) -> Result<ResponseStream, TransportError>;

    /// Handle able to interrupt `send_request` from another thread
    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        None
    }

    /// Release the link; the session is not used afterwards
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DoneStatus, TokenReader, WireValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_tokens_splits_into_packets() {
        let tokens = vec![
            Token::Row(vec![WireValue::Text("x".repeat(300).encode_utf16().collect())]),
            Token::Done(DoneStatus {
                row_count: Some(1),
                ..DoneStatus::default()
            }),
        ];
        let mut stream = ResponseStream::from_tokens(&tokens, 64);
        let mut sizes = Vec::new();
        while let Some(packet) = stream.next_packet() {
            sizes.push(packet.unwrap().len());
        }
        assert!(sizes.len() > 1);
        assert!(sizes.iter().all(|size| *size <= 64));

        let mut reader = TokenReader::new(ResponseStream::from_tokens(&tokens, 64));
        let mut decoded = Vec::new();
        while let Some(token) = reader.next_token().unwrap() {
            decoded.push(token);
        }
        assert_eq!(decoded, tokens);
    }
}
