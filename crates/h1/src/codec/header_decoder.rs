//! Header block parsing over a segment chain.
//!
//! Lines are committed one at a time: once a complete `name: value\r\n` line
//! was parsed it is added to the collection and never looked at again, even if
//! the rest of the block is still in flight.

use tracing::trace;

use crate::buffer::Cursor;
use crate::options::Limits;
use crate::protocol::BadRequest;
use crate::protocol::headers::RequestHeaders;
use crate::utils::{ensure, escape_bytes};

const LEADING_WHITESPACE: &str = "Header line must not start with whitespace.";
const MISSING_COLON: &str = "No ':' character found in header line.";
const WHITESPACE_IN_NAME: &str = "Whitespace is not allowed in header name.";
const CR_IN_VALUE: &str = "Header value must not contain CR characters.";
const FOLDING_NOT_SUPPORTED: &str = "Header value line folding not supported.";
pub(crate) const CORRUPTED: &str = "Headers corrupted, invalid header sequence.";
const EMPTY_NAME: &str = "Header name must not be empty.";

/// Outcome of one decode pass.
#[derive(Debug, Clone, Copy)]
pub enum HeaderParse<'a> {
    /// The blank line was reached; the cursor is just past it.
    Complete(Cursor<'a>),
    /// More data is needed. The cursor is past the last committed line.
    Partial(Cursor<'a>),
}

/// Enforces the header count and total size limits, one line at a time.
#[derive(Debug, Clone)]
pub struct HeaderBudget {
    max_count: usize,
    max_total_size: usize,
    count: usize,
    total_size: usize,
}

impl HeaderBudget {
    pub fn new(limits: &Limits) -> Self {
        Self {
            max_count: limits.max_request_header_count,
            max_total_size: limits.max_request_headers_total_size,
            count: 0,
            total_size: 0,
        }
    }

    /// Accounts for one complete line.
    pub fn charge(&mut self, line_len: usize, new_header: bool) -> Result<(), BadRequest> {
        self.total_size += line_len;
        ensure!(self.total_size <= self.max_total_size, BadRequest::headers_too_large());
        if new_header {
            self.count += 1;
            ensure!(self.count <= self.max_count, BadRequest::too_many_headers());
        }
        Ok(())
    }

    /// Checks that an incomplete line could still fit.
    pub fn check_pending(&self, pending: usize) -> Result<(), BadRequest> {
        ensure!(self.total_size + pending <= self.max_total_size, BadRequest::headers_too_large());
        Ok(())
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.total_size = 0;
    }
}

/// Parses the header block of one request, possibly across several passes.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    allow_folding: bool,
    budget: HeaderBudget,
    last_name: Option<String>,
}

impl HeaderDecoder {
    pub fn new(limits: &Limits, allow_folding: bool) -> Self {
        Self { allow_folding, budget: HeaderBudget::new(limits), last_name: None }
    }

    pub fn reset(&mut self) {
        self.budget.reset();
        self.last_name = None;
    }

    pub fn decode<'a>(&mut self, start: Cursor<'a>, headers: &mut RequestHeaders) -> Result<HeaderParse<'a>, BadRequest> {
        let mut line_start = start;
        loop {
            let mut cursor = line_start;
            let parsed = match cursor.peek() {
                None => None,
                Some(b'\r') => {
                    cursor.take();
                    match cursor.take() {
                        None => None,
                        Some(b'\n') => {
                            trace!(count = headers.len(), "header block complete");
                            return Ok(HeaderParse::Complete(cursor));
                        }
                        Some(_) => return Err(BadRequest::invalid_header(CORRUPTED)),
                    }
                }
                Some(b' ' | b'\t') => self.continuation_line(&mut cursor, headers)?,
                Some(_) => self.header_line(&mut cursor, headers)?,
            };

            match parsed {
                Some(()) => line_start = cursor,
                None => {
                    self.budget.check_pending(line_start.remaining())?;
                    return Ok(HeaderParse::Partial(line_start));
                }
            }
        }
    }

    /// Parses `name: value\r\n`. `None` means the line is incomplete.
    fn header_line(&mut self, cursor: &mut Cursor<'_>, headers: &mut RequestHeaders) -> Result<Option<()>, BadRequest> {
        let line_start = *cursor;
        let mut colon = *cursor;
        match colon.seek(b":\r\n") {
            None => return Ok(None),
            Some(b':') => {}
            Some(_) => return Err(BadRequest::invalid_header(MISSING_COLON)),
        }

        let name = line_start.to_vec(&colon);
        ensure!(!name.is_empty(), BadRequest::invalid_header(EMPTY_NAME));
        for &b in &name {
            ensure!(b != b' ' && b != b'\t', BadRequest::invalid_header(WHITESPACE_IN_NAME));
            ensure!(is_field_byte(b), BadRequest::invalid_header(format!("Invalid characters in header name: {}", escape_bytes(&[b]))));
        }

        colon.take();
        let Some(value) = read_value(&mut colon)? else {
            return Ok(None);
        };
        *cursor = colon;

        self.budget.charge(line_start.distance(cursor), true)?;

        // names were checked to be ASCII above
        let name = String::from_utf8_lossy(&name).into_owned();
        headers.add(&name, value);
        self.last_name = Some(name);
        Ok(Some(()))
    }

    /// A line starting with whitespace.
    fn continuation_line(&mut self, cursor: &mut Cursor<'_>, headers: &mut RequestHeaders) -> Result<Option<()>, BadRequest> {
        let Some(name) = self.last_name.as_deref() else {
            return Err(BadRequest::invalid_header(LEADING_WHITESPACE));
        };
        ensure!(self.allow_folding, BadRequest::invalid_header(FOLDING_NOT_SUPPORTED));

        let line_start = *cursor;
        let mut scan = *cursor;
        let Some(value) = read_value(&mut scan)? else {
            return Ok(None);
        };
        *cursor = scan;

        self.budget.charge(line_start.distance(cursor), false)?;
        if !value.is_empty() {
            headers.append_continuation(name, &value);
        }
        Ok(Some(()))
    }
}

/// Reads a field value through its CRLF, trimming surrounding whitespace.
fn read_value(cursor: &mut Cursor<'_>) -> Result<Option<String>, BadRequest> {
    let value_start = *cursor;
    let mut end = *cursor;
    match end.seek(b"\r\n") {
        None => return Ok(None),
        Some(b'\r') => {}
        Some(b) => return Err(invalid_value_byte(b)),
    }

    let mut after = end;
    after.take();
    match after.take() {
        None => return Ok(None),
        Some(b'\n') => {}
        Some(_) => return Err(BadRequest::invalid_header(CR_IN_VALUE)),
    }

    let raw = value_start.to_vec(&end);
    if let Some(&b) = raw.iter().find(|&&b| b != b'\t' && !is_field_byte(b)) {
        return Err(invalid_value_byte(b));
    }

    *cursor = after;
    let trimmed = raw.trim_ascii();
    Ok(Some(String::from_utf8_lossy(trimmed).into_owned()))
}

fn invalid_value_byte(b: u8) -> BadRequest {
    BadRequest::invalid_header(format!("Invalid characters in header value: {}", escape_bytes(&[b])))
}

/// Printable ASCII plus space.
#[inline]
fn is_field_byte(b: u8) -> bool {
    (0x20..0x7f).contains(&b)
}
