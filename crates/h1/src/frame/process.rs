use std::sync::Arc;

use tokio::select;
use tracing::{debug, error, info, trace};

use super::Frame;
use super::exchange::Exchange;
use super::features::Features;
use super::response::write_error_response;
use super::state::FrameState;
use crate::codec::{DecodeStatus, MessageBody};
use crate::handler::{Application, BoxError};
use crate::protocol::{BadRequest, HttpError, InputError};

/// Outcome of waiting for the next request head.
enum NextRequest {
    Ready,
    Done,
}

impl<A: Application> Frame<A> {
    /// Processes requests until the connection ends, then closes the frame.
    pub async fn run(mut self) -> Result<(), HttpError> {
        let result = if self.control.start() { self.process_requests().await } else { Ok(()) };
        self.control.close();
        result
    }

    async fn process_requests(&mut self) -> Result<(), HttpError> {
        loop {
            match self.read_head().await {
                Ok(NextRequest::Ready) => {}
                Ok(NextRequest::Done) => return Ok(()),
                Err(HttpError::RequestError { source }) => {
                    self.reject(&source).await;
                    return Err(source.into());
                }
                Err(e) => return Err(e),
            }

            if !self.control.advance(FrameState::ExecutingRequest) {
                return Ok(());
            }

            let body = match MessageBody::for_request(&self.head, &self.headers) {
                Ok(body) => body,
                Err(bad_request) => {
                    self.reject(&bad_request).await;
                    return Err(bad_request.into());
                }
            };

            let keep_alive = self.execute(&body).await;
            if !keep_alive || self.control.is_stopping() {
                debug!("connection will not be reused");
                return Ok(());
            }
            if !self.control.advance(FrameState::Waiting) {
                return Ok(());
            }
        }
    }

    /// Reads the next request head into `self.head` and `self.headers`.
    async fn read_head(&mut self) -> Result<NextRequest, HttpError> {
        self.decoder.reset();
        self.head.reset();
        self.headers.clear();
        self.control.reset_response();

        let input = Arc::clone(self.control.input());
        let mut reading = false;
        loop {
            let ready = if reading {
                input.ready().await
            } else {
                select! {
                    ready = input.ready() => ready,
                    () = self.control.stopping_token().cancelled() => {
                        debug!("stopping idle connection");
                        return Ok(NextRequest::Done);
                    }
                }
            };

            let consuming = match ready.and_then(|()| input.consuming_start()) {
                Ok(consuming) => consuming,
                Err(InputError::Aborted) => {
                    debug!("connection aborted while waiting for a request");
                    return Ok(NextRequest::Done);
                }
                Err(e) => return Err(e.into()),
            };

            if !reading && !consuming.is_empty() {
                reading = true;
                if !self.control.advance(FrameState::ReadingHeaders) {
                    return Ok(NextRequest::Done);
                }
            }

            match self.decoder.decode(consuming, &mut self.head, &mut self.headers)? {
                DecodeStatus::Complete => return Ok(NextRequest::Ready),
                DecodeStatus::Incomplete => {}
                DecodeStatus::Closed => {
                    trace!("client closed the connection");
                    return Ok(NextRequest::Done);
                }
            }
        }
    }

    /// Runs the application for the parsed request and finishes the response.
    /// Returns whether the connection may serve another request.
    async fn execute(&mut self, body: &MessageBody) -> bool {
        let exchange = Arc::new(Exchange::new(Arc::clone(&self.control), &self.head, body));
        let features = Features::new(
            std::mem::take(&mut self.head),
            std::mem::take(&mut self.headers),
            Arc::clone(&self.connection),
            Arc::clone(&exchange),
        );

        let application = Arc::clone(&self.application);
        let mut context = application.create_context(features);
        let aborted = self.control.aborted_token();
        let result = select! {
            result = application.process_request(&mut context) => result,
            () = aborted.cancelled() => Err(BoxError::from("connection aborted while the request was executing")),
        };
        if let Err(e) = result {
            error!(cause = %e, "application failed to process the request");
            exchange.report_error(e);
        }

        let mut keep_alive = exchange.produce_end().await;
        exchange.fire_on_completed().await;

        let errors = exchange.take_errors();
        application.dispose_context(context, &errors);

        if keep_alive {
            keep_alive = exchange.drain_body().await;
        }
        keep_alive
    }

    /// Answers a request the parser or the body framer refused.
    async fn reject(&self, bad_request: &BadRequest) {
        info!(status = %bad_request.status(), cause = %bad_request.message(), "bad request");
        if !self.control.try_start_response() {
            return;
        }
        write_error_response(&self.control, bad_request.status());
        if let Err(e) = self.control.output().flush().await {
            debug!(cause = %e, "failed to send error response");
        }
    }
}
