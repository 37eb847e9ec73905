//! Request path decoding and normalization.

use memchr::memchr_iter;
use percent_encoding::percent_decode;
use tracing::debug;

/// Percent-decodes a path, keeping `%2F` encoded so decoding never creates new
/// segment separators.
///
/// Returns the raw input when the decoded bytes are not valid UTF-8.
pub fn decode_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut start = 0;

    for i in memchr_iter(b'%', bytes) {
        if i < start {
            continue;
        }
        if bytes.get(i + 1) == Some(&b'2') && matches!(bytes.get(i + 2), Some(b'F' | b'f')) {
            decoded.extend(percent_decode(&bytes[start..i]));
            decoded.extend_from_slice(&bytes[i..i + 3]);
            start = i + 3;
        }
    }
    decoded.extend(percent_decode(&bytes[start..]));

    String::from_utf8(decoded).unwrap_or_else(|_| raw.to_owned())
}

/// Removes `.` and `..` segments.
///
/// `..` never climbs above the root, a trailing `.` or `..` leaves a trailing
/// slash, and an empty result becomes `/`.
pub fn remove_dot_segments(path: &str) -> String {
    if !path.split('/').any(|segment| segment == "." || segment == "..") {
        return path.to_owned();
    }

    let rest = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;

    let mut output: Vec<&str> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            other => {
                output.push(other);
                continue;
            }
        }
        if i == last {
            output.push("");
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in output {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// A path split against the configured path base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSplit {
    pub path_base: String,
    pub path: String,
    /// The base only matched ignoring ASCII case.
    pub case_mismatch: bool,
}

/// Splits `path` into `path_base` + rest.
///
/// The base must end at a segment boundary. An exact match is tried first,
/// then an ASCII case-insensitive one.
pub fn split_path_base(path: &str, path_base: &str) -> PathSplit {
    let base = path_base.trim_end_matches('/');
    let unsplit = || PathSplit { path_base: String::new(), path: path.to_owned(), case_mismatch: false };

    if base.is_empty() {
        return unsplit();
    }

    let Some(prefix) = path.get(..base.len()) else {
        return unsplit();
    };
    let rest = &path[base.len()..];
    if !(rest.is_empty() || rest.starts_with('/')) {
        return unsplit();
    }

    let case_mismatch = if prefix == base {
        false
    } else if prefix.eq_ignore_ascii_case(base) {
        debug!(path_base = base, request_path_base = prefix, "path base matched ignoring case");
        true
    } else {
        return unsplit();
    };

    PathSplit {
        path_base: prefix.to_owned(),
        path: if rest.is_empty() { "/".to_owned() } else { rest.to_owned() },
        case_mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_segments() {
        assert_eq!(remove_dot_segments("/a/../b"), "/b");
        assert_eq!(remove_dot_segments("/a/./b"), "/a/b");
        assert_eq!(remove_dot_segments("."), "/");
        assert_eq!(remove_dot_segments(".."), "/");
        assert_eq!(remove_dot_segments("/../../a"), "/a");
        assert_eq!(remove_dot_segments("/a/b/.."), "/a/");
        assert_eq!(remove_dot_segments("/a/b/."), "/a/b/");
        assert_eq!(remove_dot_segments("/a/.."), "/");
        assert_eq!(remove_dot_segments("/a.b/..c/"), "/a.b/..c/");
        assert_eq!(remove_dot_segments("/"), "/");
    }

    #[test]
    fn percent_decoding_keeps_encoded_slashes() {
        assert_eq!(decode_path("/hello%20world"), "/hello world");
        assert_eq!(decode_path("/a%2Fb%2fc"), "/a%2Fb%2fc");
        assert_eq!(decode_path("/caf%C3%A9/%2F%41"), "/caf\u{e9}/%2FA");
        assert_eq!(decode_path("/100%"), "/100%");
    }

    #[test]
    fn invalid_utf8_falls_back_to_raw() {
        assert_eq!(decode_path("/bad%FF"), "/bad%FF");
    }

    #[test]
    fn path_base_split() {
        let split = split_path_base("/app/users", "/app");
        assert_eq!(split, PathSplit { path_base: "/app".into(), path: "/users".into(), case_mismatch: false });

        let split = split_path_base("/APP/users", "/app/");
        assert_eq!(split, PathSplit { path_base: "/APP".into(), path: "/users".into(), case_mismatch: true });

        let split = split_path_base("/app", "/app");
        assert_eq!(split.path, "/");

        let split = split_path_base("/application", "/app");
        assert_eq!(split.path_base, "");
        assert_eq!(split.path, "/application");

        let split = split_path_base("/other", "");
        assert_eq!(split.path, "/other");
    }
}
