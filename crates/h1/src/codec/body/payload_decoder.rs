use super::PayloadItem;
use super::chunked_decoder::ChunkedDecoder;
use super::length_decoder::LengthDecoder;
use crate::buffer::Cursor;
use crate::protocol::BadRequest;

/// Reads a request body according to its framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),

    Chunked(ChunkedDecoder),

    /// Everything up to end of stream, for upgraded connections.
    UntilClose,

    NoBody,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        if size == 0 { Self::empty() } else { Self { kind: Kind::Length(LengthDecoder::new(size)) } }
    }

    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    pub fn is_until_close(&self) -> bool {
        matches!(self.kind, Kind::UntilClose)
    }

    /// Decodes the next item. `fin` tells whether the stream has ended, which
    /// either completes a close-delimited body or truncates a framed one.
    pub fn decode(&mut self, cursor: &mut Cursor<'_>, fin: bool) -> Result<Option<PayloadItem>, BadRequest> {
        let item = match &mut self.kind {
            Kind::Length(decoder) => decoder.decode(cursor),
            Kind::Chunked(decoder) => decoder.decode(cursor)?,
            Kind::UntilClose => {
                let available = cursor.chunk();
                if available.is_empty() {
                    None
                } else {
                    let bytes = bytes::Bytes::copy_from_slice(available);
                    cursor.skip(available.len());
                    Some(PayloadItem::Chunk(bytes))
                }
            }
            Kind::NoBody => Some(PayloadItem::Eof),
        };

        match item {
            Some(item) => Ok(Some(item)),
            None if fin && self.is_until_close() => Ok(Some(PayloadItem::Eof)),
            None if fin => Err(BadRequest::unexpected_end_of_content()),
            None => Ok(None),
        }
    }
}
