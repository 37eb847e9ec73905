//! Per-request state shared between the processing loop and the features
//! handed to the application.

use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Method, StatusCode, Version};
use tracing::{debug, trace};

use super::control::FrameControl;
use crate::codec::{MessageBody, PayloadDecoder, PayloadItem, ResponseEncoder};
use crate::connection::ReadInterest;
use crate::handler::{ApplicationErrors, BoxError};
use crate::protocol::headers::ResponseHeaders;
use crate::protocol::{BodyError, RequestHead};
use crate::utils::lock;

pub(crate) type Callback = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// What the response logic needs to know about the request.
#[derive(Debug, Clone)]
pub(crate) struct RequestInfo {
    pub method: Method,
    pub version: Version,
    pub keep_alive: bool,
    pub upgrade: bool,
}

impl RequestInfo {
    pub fn new(head: &RequestHead, body: &MessageBody) -> Self {
        Self {
            method: head.method.clone(),
            version: head.version,
            // an upgradable request never returns to request processing
            keep_alive: body.keep_alive && !body.upgrade,
            upgrade: body.upgrade,
        }
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

#[derive(Debug)]
pub(crate) struct ResponseState {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: ResponseHeaders,
    pub encoder: ResponseEncoder,
    pub started: bool,
    pub keep_alive: bool,
    pub force_close: bool,
    pub upgraded: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: ResponseHeaders::new(),
            encoder: ResponseEncoder::new(),
            started: false,
            keep_alive: false,
            force_close: false,
            upgraded: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct BodyState {
    decoder: PayloadDecoder,
    finished: bool,
    error: Option<BodyError>,
    interest: ReadInterest,
    continue_pending: bool,
    bytes_read: u64,
}

pub(crate) struct Exchange {
    pub control: Arc<FrameControl>,
    pub request: RequestInfo,
    pub response: Mutex<ResponseState>,
    pub body: Mutex<BodyState>,
    pub on_starting: Mutex<Vec<Callback>>,
    pub on_completed: Mutex<Vec<Callback>>,
    pub errors: Mutex<ApplicationErrors>,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange").field("request", &self.request).field("response", &self.response).finish_non_exhaustive()
    }
}

impl Exchange {
    pub fn new(control: Arc<FrameControl>, head: &RequestHead, body: &MessageBody) -> Self {
        let body_state = BodyState {
            decoder: body.decoder(),
            finished: body.decoder().is_empty(),
            error: None,
            interest: ReadInterest::default(),
            continue_pending: body.expect_continue && !body.decoder().is_empty(),
            bytes_read: 0,
        };
        Self {
            control,
            request: RequestInfo::new(head, body),
            response: Mutex::new(ResponseState::default()),
            body: Mutex::new(body_state),
            on_starting: Mutex::new(Vec::new()),
            on_completed: Mutex::new(Vec::new()),
            errors: Mutex::new(ApplicationErrors::default()),
        }
    }

    pub fn has_started(&self) -> bool {
        lock(&self.response).started
    }

    pub fn report_error(&self, error: BoxError) {
        lock(&self.errors).push(error);
    }

    pub fn take_errors(&self) -> ApplicationErrors {
        std::mem::take(&mut lock(&self.errors))
    }

    /// Returns whether a `100 Continue` should be sent before the first body
    /// read. Only ever true once.
    pub fn take_continue(&self) -> bool {
        let mut body = lock(&self.body);
        if !body.continue_pending {
            return false;
        }
        body.continue_pending = false;
        !self.has_started()
    }

    pub fn is_body_finished(&self) -> bool {
        lock(&self.body).finished
    }

    /// The request body's fault, if reading it failed.
    pub fn body_error(&self) -> Option<BodyError> {
        lock(&self.body).error.clone()
    }

    /// Reads the next piece of the request body out of the inbound queue.
    pub fn poll_read_body(&self, cx: &mut Context<'_>) -> Poll<Result<Option<Bytes>, BodyError>> {
        let input = self.control.input();
        let mut guard = lock(&self.body);
        let body = &mut *guard;

        loop {
            if let Some(error) = &body.error {
                return Poll::Ready(Err(error.clone()));
            }
            if body.finished {
                return Poll::Ready(Ok(None));
            }

            if let Err(error) = std::task::ready!(input.poll_ready(&mut body.interest, cx)) {
                body.error = Some(error.clone().into());
                return Poll::Ready(Err(error.into()));
            }

            let consuming = match input.consuming_start() {
                Ok(consuming) => consuming,
                Err(error) => {
                    body.error = Some(error.clone().into());
                    return Poll::Ready(Err(error.into()));
                }
            };

            let fin = consuming.is_fin();
            let end = consuming.end().position();
            let mut cursor = consuming.cursor();
            let decoded = body.decoder.decode(&mut cursor, fin);
            let consumed = cursor.position();

            match decoded {
                Ok(Some(PayloadItem::Chunk(bytes))) => {
                    consuming.complete(consumed, consumed);
                    body.bytes_read += bytes.len() as u64;
                    trace!(size = bytes.len(), "read request body chunk");
                    return Poll::Ready(Ok(Some(bytes)));
                }
                Ok(Some(PayloadItem::Eof)) => {
                    consuming.complete(consumed, consumed);
                    body.finished = true;
                    trace!(total = body.bytes_read, "request body finished");
                    return Poll::Ready(Ok(None));
                }
                Ok(None) => {
                    consuming.complete(consumed, end);
                }
                Err(bad_request) => {
                    consuming.complete(consumed, consumed);
                    debug!(cause = %bad_request, "invalid request body");
                    let error = BodyError::from(bad_request);
                    body.error = Some(error.clone());
                    return Poll::Ready(Err(error));
                }
            }
        }
    }

    /// Consumes whatever the application left unread so the next pipelined
    /// request starts at the right byte. Returns `false` when the connection
    /// cannot be reused.
    pub async fn drain_body(&self) -> bool {
        {
            let mut body = lock(&self.body);
            if body.error.is_some() {
                return false;
            }
            if body.finished {
                return true;
            }
            if body.continue_pending {
                // the client is still waiting for 100 Continue and will not send the body
                return false;
            }
            self.control.input().release(&mut body.interest);
        }

        let mut skipped = 0;
        loop {
            match std::future::poll_fn(|cx| self.poll_read_body(cx)).await {
                Ok(Some(bytes)) => skipped += bytes.len(),
                Ok(None) => break,
                Err(error) => {
                    debug!(cause = %error, "failed to drain request body");
                    return false;
                }
            }
        }
        if skipped > 0 {
            debug!(size = skipped, "skip request body");
        }
        true
    }
}
