use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

use super::PayloadItem;
use super::chunked_encoder::ChunkedEncoder;
use super::length_encoder::LengthEncoder;
use crate::protocol::SendError;

/// Writes a response body according to the framing chosen when the headers
/// were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthEncoder),

    Chunked(ChunkedEncoder),

    /// Raw bytes, the end of the body is the end of the connection.
    CloseDelimited,

    /// Nothing may follow the headers; writes are dropped.
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn close_delimited() -> Self {
        Self { kind: Kind::CloseDelimited }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    /// Bytes still owed to a declared `Content-Length`, zero for other framings.
    pub fn unwritten(&self) -> u64 {
        match &self.kind {
            Kind::Length(encoder) => encoder.remaining(),
            _ => 0,
        }
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(encoder) => encoder.is_finish(),
            Kind::Chunked(encoder) => encoder.is_finish(),
            Kind::CloseDelimited | Kind::NoBody => true,
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::CloseDelimited => {
                if let PayloadItem::Chunk(bytes) = item {
                    dst.put(bytes);
                }
                Ok(())
            }
            Kind::NoBody => Ok(()),
        }
    }
}
