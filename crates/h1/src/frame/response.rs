//! Producing the response: head once, body writes, then the end.

use bytes::Bytes;
use http::{StatusCode, Version};
use tokio_util::codec::Encoder;
use tracing::{debug, error, warn};

use super::control::FrameControl;
use super::exchange::{Callback, Exchange, ResponseState};
use crate::codec::{PayloadEncoder, PayloadItem, ResponseEncoder, ResponseItem, ResponseStart};
use crate::handler::BoxError;
use crate::protocol::headers::{KnownHeader, ResponseHeaders};
use crate::protocol::{BodyError, HeaderError, SendError};
use crate::utils::lock;

const CONNECTION_CLOSE: &[u8] = b"Connection: close\r\n";
const CONNECTION_KEEP_ALIVE: &[u8] = b"Connection: keep-alive\r\n";
const CONNECTION_UPGRADE: &[u8] = b"Connection: Upgrade\r\n";
const TRANSFER_ENCODING_CHUNKED: &[u8] = b"Transfer-Encoding: chunked\r\n";
const CONTENT_LENGTH_ZERO: &[u8] = b"Content-Length: 0\r\n";

/// Writes a body-less response that closes the connection, used when there
/// is no request to answer through the normal path (parse errors, timeouts).
pub(crate) fn write_error_response(control: &FrameControl, status: StatusCode) {
    let headers = match error_headers(control) {
        Ok(headers) => headers,
        Err(e) => {
            error!(cause = %e, "failed to build error response headers");
            return;
        }
    };

    let mut encoder = ResponseEncoder::new();
    let start = ResponseStart { status, reason: None, headers: &headers, payload: PayloadEncoder::empty() };
    let encoded = control.output().write_with(|dst| encoder.encode(ResponseItem::<Bytes>::Head(start), dst));
    if let Err(e) = encoded {
        error!(cause = %e, "failed to encode error response");
    }
}

fn error_headers(control: &FrameControl) -> Result<ResponseHeaders, HeaderError> {
    let mut headers = ResponseHeaders::new();
    headers.set_raw_connection(Bytes::from_static(CONNECTION_CLOSE))?;
    headers.set_raw_content_length(Bytes::from_static(CONTENT_LENGTH_ZERO))?;
    headers.set_raw_date(control.dates().date_line())?;
    if let Some(server) = control.server_line() {
        headers.set_raw_server(server.clone())?;
    }
    headers.set_read_only();
    Ok(headers)
}

async fn run_callbacks(callbacks: Vec<Callback>, exchange: &Exchange) {
    // last registered runs first
    for callback in callbacks.into_iter().rev() {
        if let Err(e) = callback().await {
            error!(cause = %e, "response callback failed");
            exchange.report_error(e);
        }
    }
}

impl Exchange {
    pub async fn fire_on_starting(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.on_starting));
        run_callbacks(callbacks, self).await;
    }

    pub async fn fire_on_completed(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.on_completed));
        run_callbacks(callbacks, self).await;
    }

    pub fn register_on_starting(&self, callback: Callback) -> bool {
        if self.has_started() {
            return false;
        }
        lock(&self.on_starting).push(callback);
        true
    }

    pub fn register_on_completed(&self, callback: Callback) {
        lock(&self.on_completed).push(callback);
    }

    /// Writes the response head if it has not been written yet.
    ///
    /// `app_completed` tells whether the application has already returned,
    /// which allows an empty body to be sent with `Content-Length: 0` instead
    /// of chunked framing.
    pub async fn produce_start(&self, app_completed: bool) -> Result<(), SendError> {
        if self.has_started() {
            return Ok(());
        }

        self.fire_on_starting().await;
        if !lock(&self.errors).is_empty() {
            self.set_error_response(StatusCode::INTERNAL_SERVER_ERROR);
        }

        let mut response = lock(&self.response);
        if response.started {
            return Ok(());
        }
        if !self.control.try_start_response() {
            return Err(SendError::Aborted);
        }
        response.started = true;

        let payload = self.frame_response(&mut response, app_completed)?;
        response.headers.set_read_only();

        let ResponseState { status, reason, headers, encoder, .. } = &mut *response;
        let start = ResponseStart { status: *status, reason: reason.as_deref(), headers, payload };
        self.control.output().write_with(|dst| encoder.encode(ResponseItem::<Bytes>::Head(start), dst))
    }

    /// Picks the body framing and fills in the connection-level headers.
    fn frame_response(&self, response: &mut ResponseState, app_completed: bool) -> Result<PayloadEncoder, SendError> {
        let request = &self.request;
        let status = response.status;
        let headers = &mut response.headers;

        let mut keep_alive = request.keep_alive && !response.force_close && !self.control.is_stopping();
        if headers.get_known(KnownHeader::Connection).is_some_and(|values| values.has_token("close")) {
            keep_alive = false;
        }

        let body_allowed = !(request.is_head()
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED);

        let transfer_chunked = headers
            .get_known(KnownHeader::TransferEncoding)
            .map(|values| values.tokens().last().is_some_and(|coding| coding.eq_ignore_ascii_case("chunked")));

        let payload = if response.upgraded {
            keep_alive = false;
            PayloadEncoder::close_delimited()
        } else if let Some(chunked) = transfer_chunked {
            if !chunked {
                keep_alive = false;
            }
            match (body_allowed, chunked) {
                (false, _) => PayloadEncoder::empty(),
                (true, true) => PayloadEncoder::chunked(),
                (true, false) => PayloadEncoder::close_delimited(),
            }
        } else if let Some(length) = headers.content_length() {
            if body_allowed { PayloadEncoder::fix_length(length) } else { PayloadEncoder::empty() }
        } else if !body_allowed {
            PayloadEncoder::empty()
        } else if app_completed {
            headers.set_raw_content_length(Bytes::from_static(CONTENT_LENGTH_ZERO))?;
            PayloadEncoder::fix_length(0)
        } else if request.version == Version::HTTP_11 {
            headers.set_raw_transfer_encoding(Bytes::from_static(TRANSFER_ENCODING_CHUNKED))?;
            PayloadEncoder::chunked()
        } else {
            // HTTP/1.0 has no chunked framing, the body ends with the connection
            keep_alive = false;
            PayloadEncoder::close_delimited()
        };

        if response.upgraded {
            if !headers.contains_known(KnownHeader::Connection) {
                headers.set_raw_connection(Bytes::from_static(CONNECTION_UPGRADE))?;
            }
        } else if !keep_alive {
            if !headers.get_known(KnownHeader::Connection).is_some_and(|values| values.has_token("close")) {
                headers.set_raw_connection(Bytes::from_static(CONNECTION_CLOSE))?;
            }
        } else if request.version == Version::HTTP_10 {
            headers.set_raw_connection(Bytes::from_static(CONNECTION_KEEP_ALIVE))?;
        }

        if !headers.contains_known(KnownHeader::Date) {
            headers.set_raw_date(self.control.dates().date_line())?;
        }
        if let Some(server) = self.control.server_line()
            && !headers.contains_known(KnownHeader::Server)
        {
            headers.set_raw_server(server.clone())?;
        }

        response.keep_alive = keep_alive;
        Ok(payload)
    }

    /// Replaces a response that has not started with an empty error response.
    fn set_error_response(&self, status: StatusCode) {
        let mut response = lock(&self.response);
        if response.started {
            return;
        }
        response.status = status;
        response.reason = None;
        response.headers.reset();
        response.force_close = true;
        response.upgraded = false;
    }

    /// Writes body bytes, producing the head first if needed. An empty write
    /// only flushes the head.
    pub async fn write(&self, data: Bytes) -> Result<(), SendError> {
        if lock(&self.response).upgraded {
            return Err(SendError::Upgraded);
        }
        if self.control.is_aborted() {
            return Err(SendError::Aborted);
        }

        self.produce_start(false).await?;
        if !data.is_empty() {
            let mut response = lock(&self.response);
            let encoder = &mut response.encoder;
            let written = self.control.output().write_with(|dst| encoder.encode(ResponseItem::Payload(PayloadItem::Chunk(data)), dst));
            if let Err(e) = written {
                response.force_close = true;
                return Err(e);
            }
        }
        self.control.output().flush().await
    }

    /// Finishes the response after the application returned. Returns whether
    /// the connection may serve another request.
    pub async fn produce_end(&self) -> bool {
        if self.control.is_aborted() {
            return false;
        }

        let has_errors = !lock(&self.errors).is_empty();
        let body_status = match self.body_error() {
            Some(BodyError::BadRequest { source }) => Some(source.status()),
            _ => None,
        };

        if has_errors || body_status.is_some() {
            if self.has_started() {
                // the head is on the wire already, all we can do is close
                debug!("response already started, closing the connection");
                self.control.abort("response failed after it started");
                return false;
            }
            self.set_error_response(body_status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
        }

        if lock(&self.response).upgraded {
            return false;
        }

        if let Err(e) = self.produce_start(true).await {
            debug!(cause = %e, "failed to produce response head");
            return false;
        }

        let finished = {
            let mut response = lock(&self.response);
            let unwritten = response.encoder.payload_encoder().map_or(0, PayloadEncoder::unwritten);
            if unwritten > 0 {
                let declared = response.headers.content_length().unwrap_or_default();
                Err(SendError::TooFewBytes { declared, written: declared - unwritten })
            } else {
                let encoder = &mut response.encoder;
                self.control.output().write_with(|dst| encoder.encode(ResponseItem::<Bytes>::Payload(PayloadItem::Eof), dst))
            }
        };
        if let Err(e) = finished {
            warn!(cause = %e, "incomplete response");
            self.report_error(Box::new(e) as BoxError);
            self.control.abort("incomplete response");
            return false;
        }

        if let Err(e) = self.control.output().flush().await {
            debug!(cause = %e, "failed to flush response");
            return false;
        }
        lock(&self.response).keep_alive
    }
}
