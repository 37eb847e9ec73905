//! Header collections with fast paths for well-known names.
//!
//! Both the request and the response variant store the well-known headers in
//! a fixed array of slots with a presence bitmask, and every other header in
//! an insertion-ordered overflow list that keeps the original name casing.
//! Lookups dispatch on the byte length of the name first and then compare
//! ASCII case-insensitively.

mod request;
mod response;

pub use request::RequestHeaders;
pub use response::ResponseHeaders;

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::codec::is_tchar;

/// Headers with dedicated storage, in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KnownHeader {
    Connection,
    Date,
    Server,
    ContentType,
    ContentLength,
    TransferEncoding,
    Upgrade,
    CacheControl,
    Host,
    Expect,
    Accept,
    UserAgent,
}

const KNOWN_COUNT: usize = 12;

impl KnownHeader {
    pub const ALL: [KnownHeader; KNOWN_COUNT] = [
        KnownHeader::Connection,
        KnownHeader::Date,
        KnownHeader::Server,
        KnownHeader::ContentType,
        KnownHeader::ContentLength,
        KnownHeader::TransferEncoding,
        KnownHeader::Upgrade,
        KnownHeader::CacheControl,
        KnownHeader::Host,
        KnownHeader::Expect,
        KnownHeader::Accept,
        KnownHeader::UserAgent,
    ];

    /// The canonical name.
    pub const fn name(self) -> &'static str {
        match self {
            KnownHeader::Connection => "Connection",
            KnownHeader::Date => "Date",
            KnownHeader::Server => "Server",
            KnownHeader::ContentType => "Content-Type",
            KnownHeader::ContentLength => "Content-Length",
            KnownHeader::TransferEncoding => "Transfer-Encoding",
            KnownHeader::Upgrade => "Upgrade",
            KnownHeader::CacheControl => "Cache-Control",
            KnownHeader::Host => "Host",
            KnownHeader::Expect => "Expect",
            KnownHeader::Accept => "Accept",
            KnownHeader::UserAgent => "User-Agent",
        }
    }

    /// Resolves a header name, ignoring ASCII case.
    pub fn lookup(name: &[u8]) -> Option<Self> {
        let candidates: &[KnownHeader] = match name.len() {
            4 => &[KnownHeader::Date, KnownHeader::Host],
            6 => &[KnownHeader::Server, KnownHeader::Expect, KnownHeader::Accept],
            7 => &[KnownHeader::Upgrade],
            10 => &[KnownHeader::Connection, KnownHeader::UserAgent],
            12 => &[KnownHeader::ContentType],
            13 => &[KnownHeader::CacheControl],
            14 => &[KnownHeader::ContentLength],
            17 => &[KnownHeader::TransferEncoding],
            _ => return None,
        };
        candidates.iter().copied().find(|known| known.name().as_bytes().eq_ignore_ascii_case(name))
    }

    #[inline]
    const fn bit(self) -> u16 {
        1 << self as u16
    }

    #[inline]
    const fn slot(self) -> usize {
        self as usize
    }
}

/// One or more values of a header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderValues(Vec<String>);

static EMPTY_VALUES: HeaderValues = HeaderValues(Vec::new());

impl HeaderValues {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single<S: Into<String>>(value: S) -> Self {
        Self(vec![value.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn push<S: Into<String>>(&mut self, value: S) {
        self.0.push(value.into());
    }

    /// Iterates the comma separated tokens of every value, trimmed.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.iter().flat_map(|value| value.split(',')).map(str::trim).filter(|token| !token.is_empty())
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens().any(|t| t.eq_ignore_ascii_case(token))
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut String> {
        self.0.last_mut()
    }
}

impl fmt::Display for HeaderValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}

impl From<&str> for HeaderValues {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

impl From<String> for HeaderValues {
    fn from(value: String) -> Self {
        Self::single(value)
    }
}

impl From<Vec<String>> for HeaderValues {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValues {
    fn from(values: [&str; N]) -> Self {
        Self(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

/// Where a name lives in a [`HeaderTable`].
#[derive(Clone, Copy, Debug)]
enum Slot {
    Known(KnownHeader),
    Other(usize),
}

/// The storage shared by the request and response collections.
#[derive(Clone, Debug, Default)]
pub(crate) struct HeaderTable {
    present: u16,
    known: [HeaderValues; KNOWN_COUNT],
    other: Vec<(String, HeaderValues)>,
}

impl HeaderTable {
    fn locate(&self, name: &str) -> Option<Slot> {
        if let Some(known) = KnownHeader::lookup(name.as_bytes()) {
            return Some(Slot::Known(known));
        }
        self.other.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)).map(Slot::Other)
    }

    #[inline]
    pub(crate) fn contains_known(&self, header: KnownHeader) -> bool {
        self.present & header.bit() != 0
    }

    pub(crate) fn get_known(&self, header: KnownHeader) -> Option<&HeaderValues> {
        self.contains_known(header).then(|| &self.known[header.slot()])
    }

    pub(crate) fn get(&self, name: &str) -> Option<&HeaderValues> {
        match self.locate(name)? {
            Slot::Known(known) => self.get_known(known),
            Slot::Other(i) => Some(&self.other[i].1),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub(crate) fn set_known(&mut self, header: KnownHeader, values: HeaderValues) {
        self.known[header.slot()] = values;
        self.present |= header.bit();
    }

    pub(crate) fn set(&mut self, name: &str, values: HeaderValues) {
        match self.locate(name) {
            Some(Slot::Known(known)) => self.set_known(known, values),
            Some(Slot::Other(i)) => self.other[i].1 = values,
            None => self.other.push((name.to_owned(), values)),
        }
    }

    pub(crate) fn add_known(&mut self, header: KnownHeader, value: String) {
        if self.contains_known(header) {
            self.known[header.slot()].push(value);
        } else {
            self.set_known(header, HeaderValues::single(value));
        }
    }

    pub(crate) fn add(&mut self, name: &str, value: String) {
        match self.locate(name) {
            Some(Slot::Known(known)) => self.add_known(known, value),
            Some(Slot::Other(i)) => self.other[i].1.push(value),
            None => self.other.push((name.to_owned(), HeaderValues::single(value))),
        }
    }

    /// The value list a continuation line extends.
    pub(crate) fn last_value_mut(&mut self, name: &str) -> Option<&mut String> {
        match self.locate(name)? {
            Slot::Known(known) if self.contains_known(known) => self.known[known.slot()].last_mut(),
            Slot::Known(_) => None,
            Slot::Other(i) => self.other[i].1.last_mut(),
        }
    }

    pub(crate) fn remove_known(&mut self, header: KnownHeader) -> Option<HeaderValues> {
        if !self.contains_known(header) {
            return None;
        }
        self.present &= !header.bit();
        Some(std::mem::take(&mut self.known[header.slot()]))
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<HeaderValues> {
        match self.locate(name)? {
            Slot::Known(known) => self.remove_known(known),
            Slot::Other(i) => Some(self.other.remove(i).1),
        }
    }

    pub(crate) fn clear(&mut self) {
        for header in KnownHeader::ALL {
            if self.contains_known(header) {
                self.known[header.slot()] = HeaderValues::new();
            }
        }
        self.present = 0;
        self.other.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.present.count_ones() as usize + self.other.len()
    }

    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter { table: self, next_known: 0, other: self.other.iter() }
    }

    /// Writes `Name: value\r\n` for every value of `name`.
    pub(crate) fn write_lines(dst: &mut BytesMut, name: &str, values: &HeaderValues) {
        for value in values.iter() {
            dst.reserve(name.len() + value.len() + 4);
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
    }
}

/// Iterates present headers: well-known ones in declaration order with
/// canonical names, then the others in insertion order.
#[derive(Debug)]
pub struct Iter<'a> {
    table: &'a HeaderTable,
    next_known: usize,
    other: std::slice::Iter<'a, (String, HeaderValues)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a HeaderValues);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_known < KNOWN_COUNT {
            let header = KnownHeader::ALL[self.next_known];
            self.next_known += 1;
            if let Some(values) = self.table.get_known(header) {
                return Some((header.name(), values));
            }
        }
        self.other.next().map(|(name, values)| (name.as_str(), values))
    }
}

/// Strict Content-Length rule: one or more ASCII digits, nothing else.
pub(crate) fn parse_content_length(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// A field value may hold visible ASCII, obs-text, SP and HTAB, but no other
/// control bytes. CR and LF in particular would split the response.
pub(crate) fn is_valid_field_value(value: &str) -> bool {
    value.bytes().all(|b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

pub(crate) fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_tchar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_reject_control_bytes() {
        assert!(is_valid_field_value("text/html; charset=utf-8"));
        assert!(is_valid_field_value("a\tb"));
        assert!(is_valid_field_value("caf\u{e9}"));
        for bad in ["ok\r\nSet-Cookie: evil=1", "a\nb", "a\rb", "nul\0", "del\x7f"] {
            assert!(!is_valid_field_value(bad), "{bad:?}");
        }

        assert!(is_valid_field_name("X-Request-Id"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("X A"));
        assert!(!is_valid_field_name("X:A"));
        assert!(!is_valid_field_name("X\r\nA"));
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(KnownHeader::lookup(b"content-length"), Some(KnownHeader::ContentLength));
        assert_eq!(KnownHeader::lookup(b"HOST"), Some(KnownHeader::Host));
        assert_eq!(KnownHeader::lookup(b"user-agent"), Some(KnownHeader::UserAgent));
        assert_eq!(KnownHeader::lookup(b"X-Custom"), None);
        assert_eq!(KnownHeader::lookup(b"Hosts"), None);
    }

    #[test]
    fn every_known_header_resolves_to_itself() {
        for header in KnownHeader::ALL {
            assert_eq!(KnownHeader::lookup(header.name().as_bytes()), Some(header));
            assert_eq!(KnownHeader::lookup(header.name().to_ascii_lowercase().as_bytes()), Some(header));
        }
    }

    #[test]
    fn values_display_joined() {
        let values = HeaderValues::from(["gzip", "chunked"]);
        assert_eq!(values.to_string(), "gzip, chunked");
        assert!(values.has_token("CHUNKED"));
        assert_eq!(values.tokens().collect::<Vec<_>>(), vec!["gzip", "chunked"]);
    }

    #[test]
    fn content_length_rule() {
        assert_eq!(parse_content_length("42"), Some(42));
        assert_eq!(parse_content_length("042"), Some(42));
        assert_eq!(parse_content_length("0"), Some(0));
        for bad in ["", " 42", "42 ", "42.0", "bad", "-1", "+1", "99999999999999999999999"] {
            assert_eq!(parse_content_length(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn table_add_appends_values() {
        let mut table = HeaderTable::default();
        table.add("accept", "text/html".into());
        table.add("Accept", "application/json".into());
        table.add("x-a", "1".into());
        table.add("X-A", "2".into());

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("ACCEPT").unwrap().len(), 2);
        assert_eq!(table.get("x-a").unwrap().to_string(), "1, 2");
    }

    #[test]
    fn write_lines_emits_one_line_per_value() {
        let mut dst = BytesMut::new();
        HeaderTable::write_lines(&mut dst, "Set-Cookie", &HeaderValues::from(["a=1", "b=2"]));
        assert_eq!(&dst[..], b"Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n");
    }
}
