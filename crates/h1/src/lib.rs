//! An embeddable HTTP/1.x server engine
//!
//! This crate turns a pair of async byte streams into a sequence of HTTP/1.0
//! and HTTP/1.1 request/response exchanges. It parses requests incrementally
//! out of pooled memory segments, hands each one to an [`handler::Application`],
//! and frames the response the application writes. Accepting sockets, TLS and
//! routing are left to the host.
//!
//! # Features
//!
//! - Incremental, zero-copy request line and header parsing with size limits
//! - `Content-Length`, chunked and read-to-close request bodies
//! - Automatic response framing: fixed length, chunked, or close-delimited
//! - Keep-alive and pipelining, with unread request bodies drained
//! - `Expect: 100-continue` sent lazily on the first body read
//! - Protocol upgrades (`101 Switching Protocols`)
//! - Keep-alive, request-header and execution timeouts
//! - `on_starting` / `on_completed` response callbacks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use micro_h1::connection::HttpConnection;
//! use micro_h1::frame::Features;
//! use micro_h1::handler::{BoxError, make_application};
//! use micro_h1::options::ServerOptions;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = Arc::new(ServerOptions::default());
//!     let application = Arc::new(make_application(hello_world));
//!
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let options = Arc::clone(&options);
//!         let application = Arc::clone(&application);
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let connection = HttpConnection::new(reader, writer, options);
//!             match connection.process(application).await {
//!                 Ok(()) => info!("finished process, connection shutdown"),
//!                 Err(e) => error!(cause = %e, "connection shutdown with error"),
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(features: Features) -> Result<(), BoxError> {
//!     let body = "Hello World!\r\n";
//!     features.response_headers().set_content_length(Some(body.len() as u64))?;
//!     features.write(body).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`buffer`]: pooled memory segments and the cursor that walks them
//! - [`connection`]: the inbound queue, the outbound writer and [`connection::HttpConnection`]
//! - [`codec`]: request parsing, body framing and response encoding
//! - [`frame`]: the request loop, its state machine and the application surface
//! - [`handler`]: the [`handler::Application`] contract
//! - [`protocol`]: headers, the request head and the error types
//! - [`options`] and [`clock`]: configuration and the cached `Date` header
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS (terminate it in front of the engine or wrap the streams)
//! - No response compression and no request trailers

pub mod buffer;
pub mod clock;
pub mod codec;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod options;
pub mod protocol;

mod utils;
