use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use http::StatusCode;
use tokio_util::codec::Encoder;
use tracing::error;

use super::FastWrite;
use super::body::{PayloadEncoder, PayloadItem};
use crate::protocol::SendError;
use crate::protocol::headers::{ResponseHeaders, is_valid_field_value};

/// The interim response sent before reading a body announced with
/// `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

const INIT_HEADER_SIZE: usize = 1024;

/// Everything needed to serialize a response head.
#[derive(Debug)]
pub struct ResponseStart<'a> {
    pub status: StatusCode,
    pub reason: Option<&'a str>,
    pub headers: &'a ResponseHeaders,
    /// Frames the body that follows.
    pub payload: PayloadEncoder,
}

#[derive(Debug)]
pub enum ResponseItem<'a, D> {
    Head(ResponseStart<'a>),
    Payload(PayloadItem<D>),
}

/// The reason phrase written on the status line: the custom one if set and
/// free of control bytes, otherwise the registered phrase, otherwise `Unknown`.
pub fn reason_phrase<'a>(status: StatusCode, custom: Option<&'a str>) -> &'a str {
    match custom {
        Some(reason) if !reason.is_empty() && is_valid_field_value(reason) => reason,
        _ => status.canonical_reason().unwrap_or("Unknown"),
    }
}

/// Serializes a response: one head, then payload items until the payload
/// encoder is finished.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn payload_encoder(&self) -> Option<&PayloadEncoder> {
        self.payload_encoder.as_ref()
    }
}

impl<D: Buf> Encoder<ResponseItem<'_, D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: ResponseItem<'_, D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ResponseItem::Head(start) => {
                if self.payload_encoder.as_ref().is_some_and(|encoder| !encoder.is_finish()) {
                    error!("expect payload item but receive response head");
                    return Err(SendError::invalid_body("response head written twice"));
                }

                dst.reserve(INIT_HEADER_SIZE);
                write!(
                    FastWrite(dst),
                    "HTTP/1.1 {} {}\r\n",
                    start.status.as_str(),
                    reason_phrase(start.status, start.reason)
                )?;
                start.headers.copy_to(dst);
                dst.put_slice(b"\r\n");

                self.payload_encoder = Some(start.payload);
                Ok(())
            }

            ResponseItem::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response head but receive payload item");
                    return Err(SendError::invalid_body("response body written before the head"));
                };

                // a finished encoder stays in place so late writes are still checked
                payload_encoder.encode(payload_item, dst)
            }
        }
    }
}
