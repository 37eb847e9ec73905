//! Incremental request-head decoding
//!
//! [`RequestDecoder`] drives the request-line parser and the header parser
//! over consuming transactions of the inbound queue. Each call parses as far
//! as the buffered bytes allow and commits what it consumed, so a request head
//! split over any number of reads is decoded exactly like one delivered at once.

use tracing::trace;

use super::header_decoder::{CORRUPTED, HeaderDecoder, HeaderParse};
use super::request_line::parse_request_line;
use crate::connection::Consuming;
use crate::options::ServerOptions;
use crate::protocol::headers::RequestHeaders;
use crate::protocol::{BadRequest, RequestHead};
use crate::utils::{ensure, escape_bytes};

/// Result of one decode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Request line and headers are complete.
    Complete,
    /// More bytes are needed.
    Incomplete,
    /// The stream ended cleanly before a new request started.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Headers,
    Done,
}

#[derive(Debug, Clone)]
pub struct RequestDecoder {
    state: State,
    header_decoder: HeaderDecoder,
    max_request_line_size: usize,
    path_base: String,
}

impl RequestDecoder {
    pub fn new(options: &ServerOptions) -> Self {
        Self {
            state: State::StartLine,
            header_decoder: HeaderDecoder::new(options.limits(), options.allow_header_folding()),
            max_request_line_size: options.limits().max_request_line_size,
            path_base: options.path_base().to_owned(),
        }
    }

    /// Prepares for the next request on the connection.
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.header_decoder.reset();
    }

    /// Whether the request line has been parsed.
    pub fn has_request_line(&self) -> bool {
        self.state != State::StartLine
    }

    pub fn decode(
        &mut self,
        consuming: Consuming<'_>,
        head: &mut RequestHead,
        headers: &mut RequestHeaders,
    ) -> Result<DecodeStatus, BadRequest> {
        let fin = consuming.is_fin();
        let end = consuming.end();
        let mut cursor = consuming.cursor();

        loop {
            match self.state {
                State::StartLine => match parse_request_line(cursor, head, &self.path_base)? {
                    Some(next) => {
                        ensure!(cursor.distance(&next) <= self.max_request_line_size, BadRequest::request_line_too_long());
                        trace!(method = %head.method, target = %head.raw_target, "parsed request line");
                        cursor = next;
                        self.state = State::Headers;
                    }
                    None => {
                        let pending = cursor.remaining();
                        ensure!(pending <= self.max_request_line_size, BadRequest::request_line_too_long());
                        if fin {
                            if pending == 0 {
                                return Ok(DecodeStatus::Closed);
                            }
                            return Err(BadRequest::invalid_request_line(&escape_bytes(&cursor.to_vec(&end))));
                        }
                        let (consumed, examined) = (cursor.position(), end.position());
                        consuming.complete(consumed, examined);
                        return Ok(DecodeStatus::Incomplete);
                    }
                },
                State::Headers => match self.header_decoder.decode(cursor, headers)? {
                    HeaderParse::Complete(next) => {
                        self.state = State::Done;
                        let consumed = next.position();
                        consuming.complete(consumed, consumed);
                        return Ok(DecodeStatus::Complete);
                    }
                    HeaderParse::Partial(consumed) => {
                        ensure!(!fin, BadRequest::invalid_header(CORRUPTED));
                        let (consumed, examined) = (consumed.position(), end.position());
                        consuming.complete(consumed, examined);
                        return Ok(DecodeStatus::Incomplete);
                    }
                },
                State::Done => return Ok(DecodeStatus::Complete),
            }
        }
    }
}
