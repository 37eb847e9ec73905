//! Body framing.
//!
//! [`MessageBody::for_request`] decides how a request body is delimited and
//! whether the connection can stay open afterwards. The decoders read request
//! bodies out of the inbound queue; the encoders frame response bodies.

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;

use bytes::Bytes;
use http::Version;

use crate::protocol::headers::{KnownHeader, RequestHeaders, parse_content_length};
use crate::protocol::{BadRequest, RequestHead};

/// A piece of body data, or the end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<D = Bytes> {
    Chunk(D),
    Eof,
}

impl<D> PayloadItem<D> {
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    pub fn as_bytes(&self) -> Option<&D> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

/// How a request body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Empty,
    Length(u64),
    Chunked,
    /// The rest of the stream, after an upgrade.
    UntilClose,
}

/// The framing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBody {
    pub framing: Framing,
    pub keep_alive: bool,
    pub upgrade: bool,
    pub expect_continue: bool,
}

impl MessageBody {
    pub fn for_request(head: &RequestHead, headers: &RequestHeaders) -> Result<Self, BadRequest> {
        let mut keep_alive = head.version == Version::HTTP_11;
        let mut upgrade = false;

        if let Some(connection) = headers.get_known(KnownHeader::Connection) {
            for token in connection.tokens() {
                if token.eq_ignore_ascii_case("keep-alive") {
                    keep_alive = true;
                } else if token.eq_ignore_ascii_case("close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case("upgrade") {
                    upgrade = headers.contains_known(KnownHeader::Upgrade);
                }
            }
        }

        let expect_continue = head.version == Version::HTTP_11
            && headers
                .get_known(KnownHeader::Expect)
                .and_then(|values| values.first())
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("100-continue"));

        let content_length = headers.get_known(KnownHeader::ContentLength);

        let framing = if let Some(transfer_encoding) = headers.get_known(KnownHeader::TransferEncoding) {
            let last = transfer_encoding.tokens().last().unwrap_or_default();
            if !last.eq_ignore_ascii_case("chunked") {
                return Err(BadRequest::final_transfer_coding_not_chunked(&transfer_encoding.to_string()));
            }
            if upgrade {
                return Err(BadRequest::upgrade_with_body());
            }
            if content_length.is_some() {
                // both framings present: honor chunked, never reuse the connection
                keep_alive = false;
            }
            Framing::Chunked
        } else if let Some(content_length) = content_length {
            if upgrade {
                return Err(BadRequest::upgrade_with_body());
            }
            let raw = content_length.to_string();
            let length = match (content_length.len(), content_length.first()) {
                (1, Some(value)) => parse_content_length(value),
                _ => None,
            };
            match length.ok_or_else(|| BadRequest::invalid_content_length(&raw))? {
                0 => Framing::Empty,
                length => Framing::Length(length),
            }
        } else if upgrade {
            Framing::UntilClose
        } else if head.requires_length() {
            return Err(BadRequest::length_required(&head.method, head.version));
        } else {
            Framing::Empty
        };

        Ok(Self { framing, keep_alive, upgrade, expect_continue })
    }

    pub fn decoder(&self) -> PayloadDecoder {
        match self.framing {
            Framing::Empty => PayloadDecoder::empty(),
            Framing::Length(length) => PayloadDecoder::fix_length(length),
            Framing::Chunked => PayloadDecoder::chunked(),
            Framing::UntilClose => PayloadDecoder::until_close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;

    fn head(method: Method, version: Version) -> RequestHead {
        RequestHead { method, version, ..RequestHead::default() }
    }

    fn headers(pairs: &[(&str, &str)]) -> RequestHeaders {
        let mut headers = RequestHeaders::new();
        for (name, value) in pairs {
            headers.add(name, *value);
        }
        headers
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let body = MessageBody::for_request(&head(Method::GET, Version::HTTP_11), &headers(&[])).unwrap();
        assert!(body.keep_alive);
        assert_eq!(body.framing, Framing::Empty);

        let body = MessageBody::for_request(&head(Method::GET, Version::HTTP_10), &headers(&[])).unwrap();
        assert!(!body.keep_alive);

        let body =
            MessageBody::for_request(&head(Method::GET, Version::HTTP_10), &headers(&[("Connection", "Keep-Alive")])).unwrap();
        assert!(body.keep_alive);

        let body = MessageBody::for_request(&head(Method::GET, Version::HTTP_11), &headers(&[("connection", "close")])).unwrap();
        assert!(!body.keep_alive);
    }

    #[test]
    fn content_length_framing() {
        let body = MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&[("Content-Length", "11")])).unwrap();
        assert_eq!(body.framing, Framing::Length(11));

        let body = MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&[("Content-Length", "0")])).unwrap();
        assert_eq!(body.framing, Framing::Empty);

        let error = MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&[("Content-Length", "1x")]))
            .unwrap_err();
        assert_eq!(error.message(), "Invalid content length: 1x");
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let body = MessageBody::for_request(
            &head(Method::POST, Version::HTTP_11),
            &headers(&[("Transfer-Encoding", "gzip, chunked"), ("Content-Length", "5")]),
        )
        .unwrap();
        assert_eq!(body.framing, Framing::Chunked);
        assert!(!body.keep_alive);
    }

    #[test]
    fn final_coding_must_be_chunked() {
        let error =
            MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&[("Transfer-Encoding", "chunked, gzip")]))
                .unwrap_err();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert!(error.message().contains("'chunked, gzip'"));
    }

    #[test]
    fn length_required() {
        let error = MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&[])).unwrap_err();
        assert_eq!(error.status(), StatusCode::LENGTH_REQUIRED);

        let error = MessageBody::for_request(&head(Method::PUT, Version::HTTP_10), &headers(&[])).unwrap_err();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upgrade_rules() {
        let upgrade = [("Connection", "Upgrade"), ("Upgrade", "websocket")];
        let body = MessageBody::for_request(&head(Method::GET, Version::HTTP_11), &headers(&upgrade)).unwrap();
        assert!(body.upgrade);
        assert_eq!(body.framing, Framing::UntilClose);

        let error = MessageBody::for_request(
            &head(Method::GET, Version::HTTP_11),
            &headers(&[("Connection", "Upgrade"), ("Upgrade", "websocket"), ("Content-Length", "1")]),
        )
        .unwrap_err();
        assert_eq!(error, BadRequest::upgrade_with_body());
    }

    #[test]
    fn expect_continue_only_on_http_11() {
        let expect = [("Expect", "100-continue"), ("Content-Length", "3")];
        let body = MessageBody::for_request(&head(Method::POST, Version::HTTP_11), &headers(&expect)).unwrap();
        assert!(body.expect_continue);

        let body = MessageBody::for_request(&head(Method::POST, Version::HTTP_10), &headers(&expect)).unwrap();
        assert!(!body.expect_continue);
    }
}
