//! Wire codecs.
//!
//! Request side:
//!   - [`RequestDecoder`] parses the request line and headers out of the
//!     inbound queue, resuming across reads
//!   - [`body`] frames request bodies and decodes them
//!
//! Response side:
//!   - [`ResponseEncoder`] serializes the status line and headers, then the
//!     body through the [`PayloadEncoder`] chosen for the response

pub mod body;
mod header_decoder;
pub(crate) mod path;
mod request_decoder;
mod request_line;
mod response_encoder;

use std::io;

use bytes::{BufMut, BytesMut};

pub use body::{Framing, MessageBody, PayloadDecoder, PayloadEncoder, PayloadItem};
pub use header_decoder::{HeaderBudget, HeaderDecoder, HeaderParse};
pub use request_decoder::{DecodeStatus, RequestDecoder};
pub use request_line::parse_request_line;
pub(crate) use request_line::is_tchar;
pub use response_encoder::{CONTINUE, ResponseEncoder, ResponseItem, ResponseStart, reason_phrase};

/// `io::Write` straight into a `BytesMut`, for `write!` formatting.
pub(crate) struct FastWrite<'a>(pub &'a mut BytesMut);

impl io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
