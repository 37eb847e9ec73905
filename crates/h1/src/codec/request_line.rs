//! Request-line parsing over a segment chain.
//!
//! `method SP request-target SP HTTP-version CRLF`
//!
//! Running out of buffered bytes before a delimiter is not an error: the
//! parser reports "incomplete" and the caller waits for more input.

use http::{Method, Version};

use super::path::{decode_path, remove_dot_segments, split_path_base};
use crate::buffer::Cursor;
use crate::protocol::{BadRequest, RequestHead};
use crate::utils::escape_bytes;

const KNOWN_METHODS: [(&[u8], Method); 9] = [
    (b"GET ", Method::GET),
    (b"PUT ", Method::PUT),
    (b"POST ", Method::POST),
    (b"HEAD ", Method::HEAD),
    (b"TRACE ", Method::TRACE),
    (b"PATCH ", Method::PATCH),
    (b"DELETE ", Method::DELETE),
    (b"CONNECT ", Method::CONNECT),
    (b"OPTIONS ", Method::OPTIONS),
];

/// Parses one request line starting at `start` into `head`.
///
/// Returns the cursor just past the terminating LF, or `None` when the line is
/// not complete yet.
pub fn parse_request_line<'a>(
    start: Cursor<'a>,
    head: &mut RequestHead,
    path_base: &str,
) -> Result<Option<Cursor<'a>>, BadRequest> {
    let mut cursor = start;

    // method
    let mut method = None;
    for (pattern, known) in &KNOWN_METHODS {
        if cursor.starts_with(pattern) == Some(true) {
            cursor.skip(pattern.len());
            method = Some(known.clone());
            break;
        }
    }
    let method = match method {
        Some(method) => method,
        None => {
            let mut end = cursor;
            if end.seek(b" ").is_none() {
                return Ok(None);
            }
            let token = cursor.to_vec(&end);
            if token.is_empty() || !token.iter().all(|&b| is_tchar(b)) {
                return Err(invalid_line(start));
            }
            let method = Method::from_bytes(&token).map_err(|_| invalid_line(start))?;
            cursor = end;
            cursor.take();
            method
        }
    };

    // request target
    let target_start = cursor;
    let mut scan = cursor;
    let mut needs_decoding = false;
    let delimiter = loop {
        match scan.seek(b" ?%") {
            None => return Ok(None),
            Some(b'%') => {
                needs_decoding = true;
                scan.take();
            }
            Some(delimiter) => break delimiter,
        }
    };
    let path_end = scan;
    if delimiter == b'?' && scan.seek(b" ").is_none() {
        return Ok(None);
    }
    let target_end = scan;

    let raw_target = target_start.to_vec(&target_end);
    if raw_target.is_empty() || raw_target.iter().any(|&b| b <= b' ' || b == 0x7f) {
        return Err(invalid_line(start));
    }
    cursor = target_end;
    cursor.take();

    // version
    let version = if cursor.starts_with(b"HTTP/1.1\r") == Some(true) {
        cursor.skip(9);
        Version::HTTP_11
    } else if cursor.starts_with(b"HTTP/1.0\r") == Some(true) {
        cursor.skip(9);
        Version::HTTP_10
    } else {
        let mut end = cursor;
        match end.seek(b"\r\n") {
            None => return Ok(None),
            Some(b'\r') => {}
            Some(_) => return Err(invalid_line(start)),
        }
        let token = cursor.to_vec(&end);
        if is_http_version_token(&token) {
            return Err(BadRequest::unsupported_version(&escape_bytes(&token)));
        }
        return Err(invalid_line(start));
    };
    match cursor.take() {
        None => return Ok(None),
        Some(b'\n') => {}
        Some(_) => return Err(invalid_line(start)),
    }

    // only a complete line touches the head
    head.method = method;
    head.version = version;
    head.raw_target = String::from_utf8_lossy(&raw_target).into_owned();
    head.query_string = String::from_utf8_lossy(&path_end.to_vec(&target_end)).into_owned();

    let raw_path = String::from_utf8_lossy(&target_start.to_vec(&path_end)).into_owned();
    if raw_path.starts_with('/') {
        let decoded = if needs_decoding { decode_path(&raw_path) } else { raw_path };
        let split = split_path_base(&remove_dot_segments(&decoded), path_base);
        head.path = split.path;
        head.path_base = split.path_base;
        head.path_base_case_mismatch = split.case_mismatch;
    } else {
        // asterisk-form, authority-form and absolute-form stay verbatim
        head.path = raw_path;
        head.path_base.clear();
        head.path_base_case_mismatch = false;
    }

    Ok(Some(cursor))
}

/// `Invalid request line: '<line>'` with the line through its LF.
fn invalid_line(start: Cursor<'_>) -> BadRequest {
    let mut end = start;
    if end.seek(b"\n").is_some() {
        end.take();
    }
    BadRequest::invalid_request_line(&escape_bytes(&start.to_vec(&end)))
}

/// `HTTP/<digit>.<digit>`
fn is_http_version_token(token: &[u8]) -> bool {
    matches!(token, [b'H', b'T', b'T', b'P', b'/', major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit())
}

/// RFC 7230 token characters.
pub(crate) fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
