use http::{Method, Version};

/// The request line of the request being processed, after decoding.
///
/// Owned by the processing loop and reset before every pipelined request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// The target exactly as it appeared on the wire.
    pub raw_target: String,
    /// Decoded and normalized path, without the path base.
    pub path: String,
    /// The configured path base the request matched, or empty.
    pub path_base: String,
    /// The query string including its leading `?`, or empty.
    pub query_string: String,
    pub version: Version,
    /// Set when the path base only matched ignoring case.
    pub path_base_case_mismatch: bool,
}

impl Default for RequestHead {
    fn default() -> Self {
        Self {
            method: Method::GET,
            raw_target: String::new(),
            path: String::new(),
            path_base: String::new(),
            query_string: String::new(),
            version: Version::HTTP_11,
            path_base_case_mismatch: false,
        }
    }
}

impl RequestHead {
    pub fn reset(&mut self) {
        self.method = Method::GET;
        self.raw_target.clear();
        self.path.clear();
        self.path_base.clear();
        self.query_string.clear();
        self.version = Version::HTTP_11;
        self.path_base_case_mismatch = false;
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Methods that must declare their body length.
    pub fn requires_length(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT
    }
}
