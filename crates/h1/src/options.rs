//! Server configuration.
//!
//! ```
//! use std::time::Duration;
//! use micro_h1::options::ServerOptions;
//!
//! let options = ServerOptions::builder()
//!     .keep_alive_timeout(Duration::from_secs(30))
//!     .path_base("/app")
//!     .build()
//!     .unwrap();
//! assert_eq!(options.path_base(), "/app");
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::protocol::headers::is_valid_field_value;

/// Size bounds applied while parsing a request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted request line, CRLF included. Longer lines get 414.
    pub max_request_line_size: usize,
    /// Total size of all header lines. Larger header blocks get 431.
    pub max_request_headers_total_size: usize,
    /// Most header lines per request. More get 431.
    pub max_request_header_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_request_line_size: 8 * 1024, max_request_headers_total_size: 32 * 1024, max_request_header_count: 100 }
    }
}

/// Options shared by every connection of a server, usually behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    keep_alive_timeout: Duration,
    request_headers_timeout: Duration,
    execution_timeout: Option<Duration>,
    timeouts_enabled: bool,
    limits: Limits,
    allow_header_folding: bool,
    path_base: String,
    server_header: Option<String>,
    output_capacity: usize,
    read_buffer_size: usize,
    max_buffered_input: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(130),
            request_headers_timeout: Duration::from_secs(30),
            execution_timeout: None,
            timeouts_enabled: true,
            limits: Limits::default(),
            allow_header_folding: false,
            path_base: String::new(),
            server_header: Some("micro-h1".to_owned()),
            output_capacity: 16,
            read_buffer_size: 8 * 1024,
            max_buffered_input: 1024 * 1024,
        }
    }
}

impl ServerOptions {
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder { options: ServerOptions::default() }
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    pub fn request_headers_timeout(&self) -> Duration {
        self.request_headers_timeout
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn timeouts_enabled(&self) -> bool {
        self.timeouts_enabled
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn allow_header_folding(&self) -> bool {
        self.allow_header_folding
    }

    pub fn path_base(&self) -> &str {
        &self.path_base
    }

    pub fn server_header(&self) -> Option<&str> {
        self.server_header.as_deref()
    }

    /// Depth of the outbound queue in writes; a full queue suspends writers.
    pub fn output_capacity(&self) -> usize {
        self.output_capacity
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Received but unconsumed bytes at which the connection stops reading
    /// from the transport until the request loop catches up.
    pub fn max_buffered_input(&self) -> usize {
        self.max_buffered_input
    }
}

#[derive(Debug)]
pub struct ServerOptionsBuilder {
    options: ServerOptions,
}

impl ServerOptionsBuilder {
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.options.keep_alive_timeout = timeout;
        self
    }

    pub fn request_headers_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_headers_timeout = timeout;
        self
    }

    pub fn execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.execution_timeout = timeout;
        self
    }

    /// Turns every connection timer off, e.g. while stepping through a debugger.
    pub fn disable_timeouts(mut self) -> Self {
        self.options.timeouts_enabled = false;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.options.limits = limits;
        self
    }

    /// Accepts obsolete header line folding, joining continuation lines with
    /// a single space.
    pub fn allow_header_folding(mut self, allow: bool) -> Self {
        self.options.allow_header_folding = allow;
        self
    }

    pub fn path_base<S: Into<String>>(mut self, path_base: S) -> Self {
        self.options.path_base = path_base.into();
        self
    }

    /// The `Server` header value, `None` to omit the header.
    pub fn server_header<S: Into<String>>(mut self, server: Option<S>) -> Self {
        self.options.server_header = server.map(Into::into);
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.options.output_capacity = capacity;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.options.read_buffer_size = size;
        self
    }

    pub fn max_buffered_input(mut self, size: usize) -> Self {
        self.options.max_buffered_input = size;
        self
    }

    pub fn build(self) -> Result<ServerOptions, OptionsError> {
        let options = self.options;
        if !options.path_base.is_empty() && !options.path_base.starts_with('/') {
            return Err(OptionsError::InvalidPathBase { path_base: options.path_base });
        }
        if options.output_capacity == 0 {
            return Err(OptionsError::ZeroCapacity { name: "output_capacity" });
        }
        if options.read_buffer_size == 0 {
            return Err(OptionsError::ZeroCapacity { name: "read_buffer_size" });
        }
        if options.max_buffered_input == 0 {
            return Err(OptionsError::ZeroCapacity { name: "max_buffered_input" });
        }
        let head_size = options.limits.max_request_line_size + options.limits.max_request_headers_total_size;
        if options.max_buffered_input < head_size {
            return Err(OptionsError::BufferedInputTooSmall { max_buffered_input: options.max_buffered_input, head_size });
        }
        if let Some(server) = options.server_header.as_deref().filter(|server| !is_valid_field_value(server)) {
            return Err(OptionsError::InvalidServerHeader { server: server.to_owned() });
        }
        if options.limits.max_request_line_size == 0 || options.limits.max_request_header_count == 0 {
            return Err(OptionsError::ZeroCapacity { name: "limits" });
        }
        Ok(options)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("path base must start with '/': {path_base}")]
    InvalidPathBase { path_base: String },

    #[error("{name} must be greater than zero")]
    ZeroCapacity { name: &'static str },

    #[error("max_buffered_input ({max_buffered_input}) must hold a full request head ({head_size} bytes)")]
    BufferedInputTooSmall { max_buffered_input: usize, head_size: usize },

    #[error("server header contains control characters: {server:?}")]
    InvalidServerHeader { server: String },
}
