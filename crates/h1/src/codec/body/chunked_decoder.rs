//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! The decoder walks a [`Cursor`] one byte at a time through the chunk-size
//! line, the optional extensions, the chunk data and the trailers. Its state
//! lives in the decoder, so the bytes a successful step read are consumed for
//! good and decoding resumes where it stopped once more data arrives.

use std::task::Poll;

use ChunkedState::*;
use bytes::Bytes;
use tracing::trace;

use super::PayloadItem;
use crate::buffer::Cursor;
use crate::protocol::BadRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: SizeStart, remaining_size: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.state == End
    }

    /// Decodes the next piece of the body.
    ///
    /// - `Ok(Some(PayloadItem::Chunk(bytes)))` for chunk data
    /// - `Ok(Some(PayloadItem::Eof))` after the terminal chunk and trailers
    /// - `Ok(None)` when more data is needed
    pub fn decode(&mut self, cursor: &mut Cursor<'_>) -> Result<Option<PayloadItem>, BadRequest> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if cursor.is_end() {
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(cursor, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(e)) => return Err(e),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    SizeStart,
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

macro_rules! try_next_byte {
    ($cursor:ident) => {{
        match $cursor.take() {
            Some(b) => b,
            None => return Poll::Pending,
        }
    }};
}

type Step = Poll<Result<ChunkedState, BadRequest>>;

fn invalid(reason: &str) -> Step {
    Poll::Ready(Err(BadRequest::invalid_chunk(reason)))
}

impl ChunkedState {
    fn step(self, cursor: &mut Cursor<'_>, remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Step {
        match self {
            SizeStart => ChunkedState::read_size_start(cursor, remaining_size),
            Size => ChunkedState::read_size(cursor, remaining_size),
            SizeLws => ChunkedState::read_size_lws(cursor),
            Extension => ChunkedState::read_extension(cursor),
            SizeLf => ChunkedState::read_size_lf(cursor, *remaining_size),
            Body => ChunkedState::read_body(cursor, remaining_size, buf),
            BodyCr => ChunkedState::read_body_cr(cursor),
            BodyLf => ChunkedState::read_body_lf(cursor),
            Trailer => ChunkedState::read_trailer(cursor),
            TrailerLf => ChunkedState::read_trailer_lf(cursor),
            EndCr => ChunkedState::read_end_cr(cursor),
            EndLf => ChunkedState::read_end_lf(cursor),
            End => Poll::Ready(Ok(End)),
        }
    }

    /// The first byte of a size line must be a hex digit.
    fn read_size_start(cursor: &mut Cursor<'_>, size: &mut u64) -> Step {
        let digit = match try_next_byte!(cursor) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b + 10 - b'a',
            b @ b'A'..=b'F' => b + 10 - b'A',
            _ => return invalid("Bad chunk size data: expected a hex digit."),
        };
        *size = u64::from(digit);
        Poll::Ready(Ok(Size))
    }

    /// Accumulates hex digits of the chunk size.
    fn read_size(cursor: &mut Cursor<'_>, size: &mut u64) -> Step {
        let digit = match try_next_byte!(cursor) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b + 10 - b'a',
            b @ b'A'..=b'F' => b + 10 - b'A',
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            _ => return invalid("Invalid chunk size: unexpected character."),
        };

        match size.checked_mul(16).and_then(|s| s.checked_add(u64::from(digit))) {
            Some(new_size) => {
                *size = new_size;
                Poll::Ready(Ok(Size))
            }
            None => invalid("Invalid chunk size: overflow."),
        }
    }

    fn read_size_lws(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            // whitespace may follow the size, digits may not
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => invalid("Invalid whitespace after chunk size."),
        }
    }

    /// Extensions are skipped up to CR. A bare LF inside them is rejected.
    fn read_extension(cursor: &mut Cursor<'_>) -> Step {
        match cursor.seek(b"\r\n") {
            Some(b'\r') => {
                cursor.take();
                Poll::Ready(Ok(SizeLf))
            }
            Some(_) => invalid("Chunk extension must not contain a bare LF."),
            None => Poll::Pending,
        }
    }

    fn read_size_lf(cursor: &mut Cursor<'_>, size: u64) -> Step {
        match try_next_byte!(cursor) {
            b'\n' if size == 0 => Poll::Ready(Ok(EndCr)),
            b'\n' => Poll::Ready(Ok(Body)),
            _ => invalid("Bad chunk size data: expected LF."),
        }
    }

    /// Emits as much chunk data as the current segment holds.
    fn read_body(cursor: &mut Cursor<'_>, remaining_size: &mut u64, buf: &mut Option<Bytes>) -> Step {
        if *remaining_size == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        let available = cursor.chunk();
        if available.is_empty() {
            return Poll::Pending;
        }

        let read_size = usize::try_from(*remaining_size).map_or(available.len(), |r| r.min(available.len()));
        *buf = Some(Bytes::copy_from_slice(&available[..read_size]));
        cursor.skip(read_size);
        *remaining_size -= read_size as u64;

        if *remaining_size > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    fn read_body_cr(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            b'\r' => Poll::Ready(Ok(BodyLf)),
            _ => invalid("Bad chunk suffix: expected CR."),
        }
    }

    fn read_body_lf(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            b'\n' => Poll::Ready(Ok(SizeStart)),
            _ => invalid("Bad chunk suffix: expected LF."),
        }
    }

    /// Trailer fields are read and dropped. A bare LF inside them is rejected.
    fn read_trailer(cursor: &mut Cursor<'_>) -> Step {
        match cursor.seek(b"\r\n") {
            Some(b'\r') => {
                cursor.take();
                Poll::Ready(Ok(TrailerLf))
            }
            Some(_) => invalid("Chunk trailer must not contain a bare LF."),
            None => Poll::Pending,
        }
    }

    fn read_trailer_lf(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            b'\n' => Poll::Ready(Ok(EndCr)),
            _ => invalid("Bad chunk trailer: expected LF."),
        }
    }

    fn read_end_cr(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            b'\r' => Poll::Ready(Ok(EndLf)),
            b'\n' => invalid("Chunk trailer must not contain a bare LF."),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn read_end_lf(cursor: &mut Cursor<'_>) -> Step {
        match try_next_byte!(cursor) {
            b'\n' => Poll::Ready(Ok(End)),
            _ => invalid("Bad chunked body terminator: expected LF."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SegmentPool;
    use crate::buffer::cursor::tests::chain_of;

    fn decode_all(parts: &[&[u8]]) -> Result<(Vec<u8>, bool), BadRequest> {
        let pool = SegmentPool::with_segment_size(64, 8);
        let chain = chain_of(&pool, parts);
        let mut cursor = Cursor::begin(&chain);
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            match decoder.decode(&mut cursor)? {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return Ok((body, true)),
                None => return Ok((body, false)),
            }
        }
    }

    #[test]
    fn basic() {
        let (body, finished) = decode_all(&[b"10\r\n1234567890abcdef\r\n0\r\n\r\n"]).unwrap();
        assert_eq!(body, b"1234567890abcdef");
        assert!(finished);
    }

    #[test]
    fn chunks_spanning_segments() {
        let (body, finished) = decode_all(&[b"5\r\nhel", b"lo\r\n7\r", b"\n, world\r\n0\r\n", b"\r\n"]).unwrap();
        assert_eq!(body, b"hello, world");
        assert!(finished);
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let (body, finished) = decode_all(&[b"5;chunk-ext=value\r\nhello\r\n0\r\nTrailer: value\r\n\r\n"]).unwrap();
        assert_eq!(body, b"hello");
        assert!(finished);
    }

    #[test]
    fn incomplete_input_needs_more() {
        let (body, finished) = decode_all(&[b"5\r\nhel"]).unwrap();
        assert_eq!(body, b"hel");
        assert!(!finished);
    }

    #[test]
    fn invalid_size() {
        let error = decode_all(&[b"xyz\r\n"]).unwrap_err();
        assert_eq!(error.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn size_line_without_digits() {
        let inputs: [&[u8]; 4] = [b"\r\n\r\nGET /next HTTP/1.1\r\n\r\n", b" 5\r\nhello\r\n0\r\n\r\n", b";ext\r\n\r\n", b"\t\r\n"];
        for input in inputs {
            let error = decode_all(&[input]).unwrap_err();
            assert_eq!(error.status(), http::StatusCode::BAD_REQUEST);
            assert!(error.message().starts_with("Bad chunk size data"), "{}", error.message());
        }
    }

    #[test]
    fn second_size_line_without_digits() {
        assert!(decode_all(&[b"5\r\nhello\r\n\r\n\r\n"]).is_err());
    }

    #[test]
    fn whitespace_after_size_is_allowed() {
        let (body, finished) = decode_all(&[b"5 \t;ext\r\nhello\r\n0\r\n\r\n"]).unwrap();
        assert_eq!(body, b"hello");
        assert!(finished);
    }

    #[test]
    fn bare_lf_in_trailer() {
        assert!(decode_all(&[b"0\r\nTrailer: a\nInjected: b\r\n\r\n"]).is_err());
        assert!(decode_all(&[b"0\r\n\nTrailer: a\r\n\r\n"]).is_err());
    }

    #[test]
    fn missing_crlf_after_data() {
        assert!(decode_all(&[b"5\r\nhelloBad"]).is_err());
    }

    #[test]
    fn size_overflow() {
        assert!(decode_all(&[b"fffffffffffffffff\r\n"]).is_err());
    }

    #[test]
    fn bare_lf_in_extension() {
        assert!(decode_all(&[b"5;ext\nhello\r\n"]).is_err());
    }

    #[test]
    fn zero_size_chunk() {
        let (body, finished) = decode_all(&[b"0\r\n\r\n"]).unwrap();
        assert!(body.is_empty());
        assert!(finished);
    }
}
