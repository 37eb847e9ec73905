//! The per-connection request processing loop and everything it shares with
//! the application.
//!
//! A [`Frame`] owns the parsing state of one connection and runs requests one
//! after another. The [`FrameControl`] is the handle the rest of the
//! connection (timer, transport pumps, host) uses to observe and steer it, and
//! [`Features`] is what the application gets for a single request.

mod control;
mod exchange;
mod features;
mod process;
mod response;
mod state;

use std::sync::Arc;

pub use control::FrameControl;
pub use features::{Features, RequestBody, ResponseHeadersGuard, Upgraded};
pub use state::{FrameState, FrameStateCell};

use crate::codec::RequestDecoder;
use crate::connection::ConnectionInfo;
use crate::handler::Application;
use crate::protocol::RequestHead;
use crate::protocol::headers::RequestHeaders;

pub(crate) struct Frame<A> {
    application: Arc<A>,
    control: Arc<FrameControl>,
    connection: Arc<ConnectionInfo>,
    decoder: RequestDecoder,
    head: RequestHead,
    headers: RequestHeaders,
}

impl<A: Application> Frame<A> {
    pub fn new(application: Arc<A>, control: Arc<FrameControl>, connection: Arc<ConnectionInfo>) -> Self {
        let decoder = RequestDecoder::new(control.options());
        Self { application, control, connection, decoder, head: RequestHead::default(), headers: RequestHeaders::new() }
    }
}
