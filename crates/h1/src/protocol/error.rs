use std::io;
use std::sync::Arc;

use http::{StatusCode, Version};
use thiserror::Error;

/// Top-level error returned when a connection stops processing.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: BadRequest,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("input error: {source}")]
    InputError {
        #[from]
        source: InputError,
    },
}

/// A request rejected by the parser or the body framer.
///
/// Carries the status code the connection answers with before closing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status}: {message}")]
pub struct BadRequest {
    status: StatusCode,
    message: String,
}

impl BadRequest {
    pub fn new<S: ToString>(status: StatusCode, message: S) -> Self {
        Self { status, message: message.to_string() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_request_line(escaped_line: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("Invalid request line: '{escaped_line}'"))
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    pub fn unsupported_version(escaped_version: &str) -> Self {
        Self::new(StatusCode::HTTP_VERSION_NOT_SUPPORTED, format!("Unrecognized HTTP version: '{escaped_version}'"))
    }

    pub fn invalid_content_length(value: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("Invalid content length: {value}"))
    }

    pub fn final_transfer_coding_not_chunked(value: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("The message body length cannot be determined because the final transfer coding was set to '{value}' instead of 'chunked'."),
        )
    }

    pub fn length_required(method: &http::Method, version: Version) -> Self {
        // HTTP/1.0 clients predate 411, answer them with a plain 400
        let status = if version == Version::HTTP_10 { StatusCode::BAD_REQUEST } else { StatusCode::LENGTH_REQUIRED };
        Self::new(status, format!("{method} request contains no Content-Length or Transfer-Encoding header"))
    }

    pub fn upgrade_with_body() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Upgrade request must not contain a Content-Length or chunked Transfer-Encoding header.")
    }

    pub fn request_line_too_long() -> Self {
        Self::new(StatusCode::URI_TOO_LONG, "Request line too long.")
    }

    pub fn headers_too_large() -> Self {
        Self::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "Request headers too long.")
    }

    pub fn too_many_headers() -> Self {
        Self::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "Request contains too many headers.")
    }

    pub fn unexpected_end_of_content() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Unexpected end of request content.")
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }
}

/// Failures of the inbound byte queue.
///
/// Cloneable so that every waiter observing a poisoned queue gets its own copy.
#[derive(Error, Debug, Clone)]
pub enum InputError {
    #[error("Concurrent reads are not supported.")]
    ConcurrentRead,

    #[error("A consuming operation is already in progress.")]
    ConsumingInProgress,

    #[error("The connection was aborted.")]
    Aborted,

    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl InputError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io(Arc::new(e.into()))
    }
}

/// Header collection misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Headers are read-only, response has already started.")]
    ReadOnly,

    #[error("Invalid Content-Length: \"{value}\". Value must be a positive integral number.")]
    InvalidContentLength { value: String },

    #[error("An item with the same key has already been added. Key: {name}")]
    Duplicate { name: String },

    #[error("Invalid header name: {name:?}")]
    InvalidName { name: String },

    #[error("Invalid control character in header value of {name}.")]
    InvalidValue { name: String },

    #[error("Invalid control character in reason phrase.")]
    InvalidReason,

    #[error("Content-Length must have exactly one value.")]
    MultipleContentLength,
}

impl HeaderError {
    pub fn invalid_content_length<S: ToString>(value: S) -> Self {
        Self::InvalidContentLength { value: value.to_string() }
    }

    pub fn duplicate<S: ToString>(name: S) -> Self {
        Self::Duplicate { name: name.to_string() }
    }

    pub fn invalid_name<S: ToString>(name: S) -> Self {
        Self::InvalidName { name: name.to_string() }
    }

    pub fn invalid_value<S: ToString>(name: S) -> Self {
        Self::InvalidValue { name: name.to_string() }
    }
}

/// Failures while reading a request body.
#[derive(Error, Debug, Clone)]
pub enum BodyError {
    #[error("bad request body: {source}")]
    BadRequest {
        #[from]
        source: BadRequest,
    },

    #[error("input error: {source}")]
    Input {
        #[from]
        source: InputError,
    },
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("Response Content-Length mismatch: too many bytes written ({written} of {declared}).")]
    TooManyBytes { declared: u64, written: u64 },

    #[error("Response Content-Length mismatch: too few bytes written ({written} of {declared}).")]
    TooFewBytes { declared: u64, written: u64 },

    #[error("Cannot write to the response body, the connection has been upgraded.")]
    Upgraded,

    #[error("The request is not upgradable or the response has already started.")]
    NotUpgradable,

    #[error("The connection was aborted.")]
    Aborted,

    #[error("The output channel is closed.")]
    Closed,

    #[error("header error: {source}")]
    Header {
        #[from]
        source: HeaderError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
