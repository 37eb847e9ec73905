use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info};

use super::response::write_error_response;
use super::state::{FrameState, FrameStateCell};
use crate::clock::DateCache;
use crate::connection::{ProduceEndType, SocketInput, SocketOutput};
use crate::options::ServerOptions;
use crate::utils::lock;

/// The handle shared by everything that can steer a connection: the
/// processing loop, the timer, the request features and the host.
#[derive(Debug)]
pub struct FrameControl {
    options: Arc<ServerOptions>,
    dates: Arc<DateCache>,
    server_line: Option<Bytes>,
    input: Arc<SocketInput>,
    output: Arc<SocketOutput>,

    state: FrameStateCell,
    started: AtomicBool,
    response_started: AtomicBool,

    deadline: Mutex<Option<Instant>>,
    rearmed: Notify,

    aborted: CancellationToken,
    stopping: CancellationToken,
    closed: CancellationToken,
}

impl FrameControl {
    pub fn new(options: Arc<ServerOptions>, dates: Arc<DateCache>, input: Arc<SocketInput>, output: Arc<SocketOutput>) -> Self {
        let server_line = options.server_header().map(|server| Bytes::from(format!("Server: {server}\r\n")));
        Self {
            options,
            dates,
            server_line,
            input,
            output,
            state: FrameStateCell::default(),
            started: AtomicBool::new(false),
            response_started: AtomicBool::new(false),
            deadline: Mutex::new(None),
            rearmed: Notify::new(),
            aborted: CancellationToken::new(),
            stopping: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn dates(&self) -> &DateCache {
        &self.dates
    }

    pub(crate) fn server_line(&self) -> Option<&Bytes> {
        self.server_line.as_ref()
    }

    pub fn input(&self) -> &Arc<SocketInput> {
        &self.input
    }

    pub fn output(&self) -> &Arc<SocketOutput> {
        &self.output
    }

    pub fn state(&self) -> FrameState {
        self.state.load()
    }

    /// Attempts a state transition, rearming the timer on success.
    pub fn transition(&self, to: FrameState) -> Result<FrameState, FrameState> {
        let previous = self.state.transition(to)?;
        self.rearm(to);
        Ok(previous)
    }

    /// Steps the request cycle forward. A stopping connection stays in
    /// `Stopping` but keeps processing the request in flight.
    pub(crate) fn advance(&self, to: FrameState) -> bool {
        match self.transition(to) {
            Ok(_) => true,
            Err(current) => current == FrameState::Stopping,
        }
    }

    fn rearm(&self, state: FrameState) {
        let deadline = state.timeout(&self.options).map(|timeout| Instant::now() + timeout);
        *lock(&self.deadline) = deadline;
        self.rearmed.notify_one();
    }

    /// Claims the processing loop. Only the first call returns `true`.
    pub(crate) fn start(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel) && self.transition(FrameState::Waiting).is_ok()
    }

    /// Claims the right to write the response head for the current request.
    pub(crate) fn try_start_response(&self) -> bool {
        !self.response_started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn reset_response(&self) {
        self.response_started.store(false, Ordering::Release);
    }

    pub fn has_response_started(&self) -> bool {
        self.response_started.load(Ordering::Acquire)
    }

    /// Tears the connection down immediately. Only the first call has an
    /// effect; returns whether this call was it.
    pub fn abort(&self, reason: &str) -> bool {
        if self.transition(FrameState::Aborted).is_err() {
            return false;
        }
        debug!(reason, "connection aborted");
        self.aborted.cancel();
        self.input.abort();
        self.output.end(ProduceEndType::SocketDisconnect);
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    /// Cancelled when the connection is aborted.
    pub fn aborted_token(&self) -> CancellationToken {
        self.aborted.clone()
    }

    /// Asks the loop to finish: a request in flight completes without
    /// keep-alive, an idle connection closes. The returned future resolves
    /// once the loop has exited.
    pub fn stop(&self) -> WaitForCancellationFutureOwned {
        if self.transition(FrameState::Stopping).is_ok() {
            debug!("connection stopping");
        }
        self.stopping.cancel();
        self.closed.clone().cancelled_owned()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    pub(crate) fn stopping_token(&self) -> &CancellationToken {
        &self.stopping
    }

    /// Called by the loop on exit.
    pub(crate) fn close(&self) {
        let _ = self.transition(FrameState::Stopped);
        self.output.end(ProduceEndType::SocketShutdown);
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Drives the connection timer until the connection closes.
    pub async fn run_timer(&self) {
        loop {
            let deadline = *lock(&self.deadline);
            let expired = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => pending().await,
                }
            };

            select! {
                () = self.closed.cancelled() => return,
                () = self.rearmed.notified() => {}
                () = expired => {
                    if *lock(&self.deadline) == deadline {
                        self.on_timeout();
                    }
                }
            }
        }
    }

    fn on_timeout(&self) {
        let Ok(previous) = self.transition(FrameState::Timeout) else {
            return;
        };
        info!(state = ?previous, "connection timed out");

        let respond = matches!(previous, FrameState::ReadingHeaders | FrameState::ExecutingRequest) && self.try_start_response();
        if respond {
            write_error_response(self, StatusCode::REQUEST_TIMEOUT);
            // shutdown first so the 408 is written before the abort closes the socket
            self.output.end(ProduceEndType::SocketShutdown);
        }
        self.abort("timeout");
    }
}
