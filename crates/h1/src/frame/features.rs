//! The request and response surface handed to the application.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::{Method, StatusCode, Version};
use http_body::{Body, Frame, SizeHint};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::exchange::{Exchange, ResponseState};
use super::state::FrameState;
use crate::codec::CONTINUE;
use crate::connection::ConnectionInfo;
use crate::handler::BoxError;
use crate::protocol::headers::{RequestHeaders, ResponseHeaders, is_valid_field_value};
use crate::protocol::{BodyError, HeaderError, InputError, RequestHead, SendError};
use crate::utils::{ensure, lock};

/// Everything the application can see and do for one request.
#[derive(Debug)]
pub struct Features {
    head: RequestHead,
    headers: RequestHeaders,
    body: Option<RequestBody>,
    connection: Arc<ConnectionInfo>,
    exchange: Arc<Exchange>,
}

impl Features {
    pub(crate) fn new(head: RequestHead, headers: RequestHeaders, connection: Arc<ConnectionInfo>, exchange: Arc<Exchange>) -> Self {
        let body = RequestBody { exchange: Arc::clone(&exchange), sending_continue: Mutex::new(None) };
        Self { head, headers, body: Some(body), connection, exchange }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    /// The request target exactly as received.
    pub fn raw_target(&self) -> &str {
        &self.head.raw_target
    }

    /// The decoded, normalized path below the path base.
    pub fn path(&self) -> &str {
        &self.head.path
    }

    pub fn path_base(&self) -> &str {
        &self.head.path_base
    }

    /// The query string including its leading `?`, or empty.
    pub fn query_string(&self) -> &str {
        &self.head.query_string
    }

    pub fn scheme(&self) -> &'static str {
        "http"
    }

    pub fn request_headers(&self) -> &RequestHeaders {
        &self.headers
    }

    pub fn request_headers_mut(&mut self) -> &mut RequestHeaders {
        &mut self.headers
    }

    /// The request body, `None` once taken.
    pub fn body_mut(&mut self) -> Option<&mut RequestBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn status(&self) -> StatusCode {
        lock(&self.exchange.response).status
    }

    pub fn set_status(&self, status: StatusCode) -> Result<(), HeaderError> {
        let mut response = lock(&self.exchange.response);
        ensure!(!response.started, HeaderError::ReadOnly);
        response.status = status;
        Ok(())
    }

    pub fn reason(&self) -> Option<String> {
        lock(&self.exchange.response).reason.clone()
    }

    /// Overrides the reason phrase. Control bytes other than HTAB are rejected.
    pub fn set_reason<S: Into<String>>(&self, reason: S) -> Result<(), HeaderError> {
        let reason = reason.into();
        ensure!(is_valid_field_value(&reason), HeaderError::InvalidReason);
        let mut response = lock(&self.exchange.response);
        ensure!(!response.started, HeaderError::ReadOnly);
        response.reason = Some(reason);
        Ok(())
    }

    /// Locks the response headers. Do not hold the guard across an `.await`.
    pub fn response_headers(&self) -> ResponseHeadersGuard<'_> {
        ResponseHeadersGuard(lock(&self.exchange.response))
    }

    pub fn has_started(&self) -> bool {
        self.exchange.has_started()
    }

    /// Registers a callback run right before the response head is written.
    /// Callbacks run in reverse order of registration.
    pub fn on_starting<F, Fut>(&self, callback: F) -> Result<(), HeaderError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let registered = self.exchange.register_on_starting(Box::new(move || callback().boxed()));
        ensure!(registered, HeaderError::ReadOnly);
        Ok(())
    }

    /// Registers a callback run after the application returned.
    pub fn on_completed<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.exchange.register_on_completed(Box::new(move || callback().boxed()));
    }

    /// Writes response body bytes, sending the head first if needed.
    pub async fn write<B: Into<Bytes>>(&self, data: B) -> Result<(), SendError> {
        self.exchange.write(data.into()).await
    }

    /// Sends the head now, without body bytes.
    pub async fn start(&self) -> Result<(), SendError> {
        self.exchange.write(Bytes::new()).await
    }

    /// Whether the request asked for a protocol upgrade.
    pub fn is_upgradable(&self) -> bool {
        self.exchange.request.upgrade
    }

    /// Answers `101 Switching Protocols` and hands over the raw stream. The
    /// normal response API rejects writes afterwards.
    pub async fn upgrade(&mut self) -> Result<Upgraded, SendError> {
        ensure!(self.is_upgradable(), SendError::NotUpgradable);
        {
            let mut response = lock(&self.exchange.response);
            ensure!(!response.started, SendError::NotUpgradable);
            response.status = StatusCode::SWITCHING_PROTOCOLS;
            response.reason = None;
            response.upgraded = true;
        }

        self.exchange.produce_start(false).await?;
        self.exchange.control.output().flush().await?;
        ensure!(self.exchange.control.advance(FrameState::UpgradedRequest), SendError::Aborted);
        debug!("connection upgraded");

        self.body.take();
        Ok(Upgraded { exchange: Arc::clone(&self.exchange) })
    }

    /// Cancelled when the connection is aborted.
    pub fn aborted(&self) -> CancellationToken {
        self.exchange.control.aborted_token()
    }

    pub fn abort(&self) {
        self.exchange.control.abort("aborted by the application");
    }
}

/// Exclusive access to the response headers.
#[derive(Debug)]
pub struct ResponseHeadersGuard<'a>(MutexGuard<'a, ResponseState>);

impl Deref for ResponseHeadersGuard<'_> {
    type Target = ResponseHeaders;

    fn deref(&self) -> &Self::Target {
        &self.0.headers
    }
}

impl DerefMut for ResponseHeadersGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0.headers
    }
}

/// The request body, read straight out of the connection's inbound queue.
///
/// For `Expect: 100-continue` requests the interim response is sent on the
/// first read, unless the final response has started by then.
pub struct RequestBody {
    exchange: Arc<Exchange>,
    // only ever accessed through `get_mut`; the mutex makes the body `Sync`
    sending_continue: Mutex<Option<BoxFuture<'static, Result<(), SendError>>>>,
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody").field("finished", &self.exchange.is_body_finished()).finish_non_exhaustive()
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let sending_continue = this.sending_continue.get_mut().unwrap_or_else(PoisonError::into_inner);

        if sending_continue.is_none() && this.exchange.take_continue() {
            let output = Arc::clone(this.exchange.control.output());
            *sending_continue = Some(async move { output.write_async(CONTINUE).await }.boxed());
        }

        if let Some(sending) = sending_continue.as_mut() {
            let sent = ready!(sending.poll_unpin(cx));
            *sending_continue = None;
            match sent {
                Ok(()) => debug!("sent 100 continue response"),
                Err(e) => {
                    debug!(cause = %e, "failed to send 100 continue response");
                    return Poll::Ready(Some(Err(InputError::Aborted.into())));
                }
            }
        }

        match ready!(this.exchange.poll_read_body(cx)) {
            Ok(Some(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Ok(None) => Poll::Ready(None),
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.exchange.is_body_finished()
    }

    fn size_hint(&self) -> SizeHint {
        if self.exchange.is_body_finished() { SizeHint::with_exact(0) } else { SizeHint::default() }
    }
}

/// The raw stream of an upgraded connection.
#[derive(Debug)]
pub struct Upgraded {
    exchange: Arc<Exchange>,
}

impl Upgraded {
    /// Reads the next bytes from the client, `None` at end of stream.
    pub async fn read(&mut self) -> Result<Option<Bytes>, BodyError> {
        std::future::poll_fn(|cx| self.exchange.poll_read_body(cx)).await
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), SendError> {
        self.exchange.control.output().write_async(data).await
    }
}
