use bytes::{BufMut, Bytes, BytesMut};

use super::{HeaderTable, HeaderValues, Iter, KNOWN_COUNT, KnownHeader, is_valid_field_name, is_valid_field_value, parse_content_length};
use crate::protocol::HeaderError;
use crate::utils::ensure;

/// Headers of the response being produced.
///
/// Mutators fail once [`ResponseHeaders::set_read_only`] was called, which the
/// frame does right before the headers hit the wire. Names must be tokens and
/// values must not carry control bytes other than HTAB. `Content-Length` holds
/// exactly one valid value. Hot headers can carry a pre-encoded
/// `Name: value\r\n` line that is copied to the wire verbatim.
#[derive(Clone, Debug, Default)]
pub struct ResponseHeaders {
    table: HeaderTable,
    raw: [Option<Bytes>; KNOWN_COUNT],
    content_length: Option<u64>,
    read_only: bool,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> &HeaderValues {
        self.table.get(name).unwrap_or(&super::EMPTY_VALUES)
    }

    pub fn try_get(&self, name: &str) -> Option<&HeaderValues> {
        self.table.get(name)
    }

    pub fn get_known(&self, header: KnownHeader) -> Option<&HeaderValues> {
        self.table.get_known(header)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    pub fn contains_known(&self, header: KnownHeader) -> bool {
        self.table.contains_known(header)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    pub fn iter(&self) -> Iter<'_> {
        self.table.iter()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The parsed `Content-Length`, if one is set.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn set<V: Into<HeaderValues>>(&mut self, name: &str, values: V) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        ensure!(is_valid_field_name(name), HeaderError::invalid_name(name));
        let values = values.into();
        match KnownHeader::lookup(name.as_bytes()) {
            Some(known) => self.store_known(known, values),
            None => {
                if values.is_empty() {
                    self.table.remove(name);
                } else {
                    check_values(name, &values)?;
                    self.table.set(name, values);
                }
                Ok(())
            }
        }
    }

    pub fn set_known<V: Into<HeaderValues>>(&mut self, header: KnownHeader, values: V) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        self.store_known(header, values.into())
    }

    fn store_known(&mut self, header: KnownHeader, values: HeaderValues) -> Result<(), HeaderError> {
        if values.is_empty() {
            self.drop_known(header);
            return Ok(());
        }
        check_values(header.name(), &values)?;
        if header == KnownHeader::ContentLength {
            self.content_length = Some(validate_content_length(&values)?);
        }
        self.raw[header.slot()] = None;
        self.table.set_known(header, values);
        Ok(())
    }

    /// Appends a value, keeping the values already present.
    pub fn add<S: Into<String>>(&mut self, name: &str, value: S) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        ensure!(is_valid_field_name(name), HeaderError::invalid_name(name));
        let value = value.into();
        ensure!(is_valid_field_value(&value), HeaderError::invalid_value(name));
        match KnownHeader::lookup(name.as_bytes()) {
            Some(KnownHeader::ContentLength) => {
                ensure!(self.content_length.is_none(), HeaderError::MultipleContentLength);
                self.store_known(KnownHeader::ContentLength, HeaderValues::single(value))
            }
            Some(known) => {
                self.raw[known.slot()] = None;
                self.table.add_known(known, value);
                Ok(())
            }
            None => {
                self.table.add(name, value);
                Ok(())
            }
        }
    }

    /// Adds a header that must not be present yet.
    pub fn try_insert<V: Into<HeaderValues>>(&mut self, name: &str, values: V) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        ensure!(!self.table.contains(name), HeaderError::duplicate(name));
        self.set(name, values)
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<HeaderValues>, HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        match KnownHeader::lookup(name.as_bytes()) {
            Some(known) => Ok(self.drop_known(known)),
            None => Ok(self.table.remove(name)),
        }
    }

    fn drop_known(&mut self, header: KnownHeader) -> Option<HeaderValues> {
        if header == KnownHeader::ContentLength {
            self.content_length = None;
        }
        self.raw[header.slot()] = None;
        self.table.remove_known(header)
    }

    pub fn clear(&mut self) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        self.reset();
        Ok(())
    }

    pub fn set_content_length(&mut self, length: Option<u64>) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        match length {
            Some(length) => self.store_known(KnownHeader::ContentLength, HeaderValues::single(length.to_string())),
            None => {
                self.drop_known(KnownHeader::ContentLength);
                Ok(())
            }
        }
    }

    /// Stores a complete, pre-encoded `Date: ...\r\n` line.
    pub fn set_raw_date(&mut self, line: Bytes) -> Result<(), HeaderError> {
        self.set_raw(KnownHeader::Date, line)
    }

    pub fn set_raw_server(&mut self, line: Bytes) -> Result<(), HeaderError> {
        self.set_raw(KnownHeader::Server, line)
    }

    pub fn set_raw_connection(&mut self, line: Bytes) -> Result<(), HeaderError> {
        self.set_raw(KnownHeader::Connection, line)
    }

    pub fn set_raw_transfer_encoding(&mut self, line: Bytes) -> Result<(), HeaderError> {
        self.set_raw(KnownHeader::TransferEncoding, line)
    }

    pub fn set_raw_content_length(&mut self, line: Bytes) -> Result<(), HeaderError> {
        self.set_raw(KnownHeader::ContentLength, line)
    }

    fn set_raw(&mut self, header: KnownHeader, line: Bytes) -> Result<(), HeaderError> {
        ensure!(!self.read_only, HeaderError::ReadOnly);
        let body = line.strip_suffix(b"\r\n").unwrap_or_default();
        ensure!(
            body.len() > header.name().len() && body[header.name().len()] == b':',
            HeaderError::invalid_value(header.name())
        );
        ensure!(body.iter().all(|&b| b == b'\t' || (b >= 0x20 && b != 0x7f)), HeaderError::invalid_value(header.name()));
        let value = raw_value(header, &line);
        if header == KnownHeader::ContentLength {
            self.content_length = Some(parse_content_length(&value).ok_or_else(|| HeaderError::invalid_content_length(&value))?);
        }
        self.table.set_known(header, HeaderValues::single(value));
        self.raw[header.slot()] = Some(line);
        Ok(())
    }

    /// Freezes the collection; every later mutation fails.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Clears everything, including the read-only flag, for the next request
    /// on the connection.
    pub(crate) fn reset(&mut self) {
        self.table.clear();
        self.raw = Default::default();
        self.content_length = None;
        self.read_only = false;
    }

    /// Serializes every header as wire lines.
    pub fn copy_to(&self, dst: &mut BytesMut) {
        for header in KnownHeader::ALL {
            if let Some(raw) = &self.raw[header.slot()] {
                dst.put_slice(raw);
            } else if let Some(values) = self.table.get_known(header) {
                HeaderTable::write_lines(dst, header.name(), values);
            }
        }
        for (name, values) in self.table.iter().filter(|(name, _)| KnownHeader::lookup(name.as_bytes()).is_none()) {
            HeaderTable::write_lines(dst, name, values);
        }
    }
}

impl<'a> IntoIterator for &'a ResponseHeaders {
    type Item = (&'a str, &'a HeaderValues);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn check_values(name: &str, values: &HeaderValues) -> Result<(), HeaderError> {
    ensure!(values.iter().all(is_valid_field_value), HeaderError::invalid_value(name));
    Ok(())
}

fn validate_content_length(values: &HeaderValues) -> Result<u64, HeaderError> {
    ensure!(values.len() == 1, HeaderError::MultipleContentLength);
    let value = values.first().unwrap_or_default();
    parse_content_length(value).ok_or_else(|| HeaderError::invalid_content_length(value))
}

/// Extracts the value from a `Name: value\r\n` line.
fn raw_value(header: KnownHeader, line: &[u8]) -> String {
    let prefix = header.name().len() + 1;
    let body = line.get(prefix..).unwrap_or_default();
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);
    String::from_utf8_lossy(body.trim_ascii()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_blocks_every_mutator() {
        let mut headers = ResponseHeaders::new();
        headers.set("Content-Type", "text/plain").unwrap();
        headers.set_read_only();

        assert_eq!(headers.set("X-A", "1"), Err(HeaderError::ReadOnly));
        assert_eq!(headers.add("X-A", "1"), Err(HeaderError::ReadOnly));
        assert_eq!(headers.try_insert("X-A", "1"), Err(HeaderError::ReadOnly));
        assert_eq!(headers.remove("Content-Type"), Err(HeaderError::ReadOnly));
        assert_eq!(headers.clear(), Err(HeaderError::ReadOnly));
        assert_eq!(headers.set_content_length(Some(1)), Err(HeaderError::ReadOnly));
        assert_eq!(headers.set_raw_date(Bytes::from_static(b"Date: x\r\n")), Err(HeaderError::ReadOnly));

        // reads are unaffected
        assert_eq!(headers.get("content-type").first(), Some("text/plain"));
        assert_eq!(headers.len(), 1);
        assert_eq!(
            HeaderError::ReadOnly.to_string(),
            "Headers are read-only, response has already started."
        );
    }

    #[test]
    fn content_length_is_validated() {
        let mut headers = ResponseHeaders::new();
        for (value, expected) in [("42", 42), ("042", 42), ("0", 0)] {
            headers.set("Content-Length", value).unwrap();
            assert_eq!(headers.content_length(), Some(expected));
        }

        for bad in ["", " 42", "42 ", "42.0", "bad"] {
            let error = headers.set("content-length", bad).unwrap_err();
            assert_eq!(error, HeaderError::invalid_content_length(bad));
            assert_eq!(
                error.to_string(),
                format!("Invalid Content-Length: \"{bad}\". Value must be a positive integral number.")
            );
        }
        // failed sets leave the previous value in place
        assert_eq!(headers.content_length(), Some(0));
    }

    #[test]
    fn content_length_cleared_by_remove_and_clear() {
        let mut headers = ResponseHeaders::new();
        headers.set_content_length(Some(10)).unwrap();
        headers.remove("content-length").unwrap();
        assert_eq!(headers.content_length(), None);

        headers.set_content_length(Some(10)).unwrap();
        headers.clear().unwrap();
        assert_eq!(headers.content_length(), None);
        assert!(headers.is_empty());
    }

    #[test]
    fn copy_to_uses_declaration_order_and_raw_lines() {
        let mut headers = ResponseHeaders::new();
        headers.set("X-Custom", "1").unwrap();
        headers.set("Content-Type", "text/plain").unwrap();
        headers.set_raw_date(Bytes::from_static(b"Date: Thu, 01 Jan 1970 00:00:00 GMT\r\n")).unwrap();
        headers.set_raw_server(Bytes::from_static(b"Server: micro-h1\r\n")).unwrap();
        headers.set_content_length(Some(5)).unwrap();

        let mut dst = BytesMut::new();
        headers.copy_to(&mut dst);
        assert_eq!(
            &dst[..],
            b"Date: Thu, 01 Jan 1970 00:00:00 GMT\r\n\
              Server: micro-h1\r\n\
              Content-Type: text/plain\r\n\
              Content-Length: 5\r\n\
              X-Custom: 1\r\n"
        );
        assert_eq!(headers.get("Date").first(), Some("Thu, 01 Jan 1970 00:00:00 GMT"));
    }

    #[test]
    fn normal_set_drops_the_raw_form() {
        let mut headers = ResponseHeaders::new();
        headers.set_raw_server(Bytes::from_static(b"Server: raw\r\n")).unwrap();
        headers.set("server", "custom").unwrap();

        let mut dst = BytesMut::new();
        headers.copy_to(&mut dst);
        assert_eq!(&dst[..], b"Server: custom\r\n");
    }

    #[test]
    fn raw_content_length_is_parsed() {
        let mut headers = ResponseHeaders::new();
        headers.set_raw_content_length(Bytes::from_static(b"Content-Length: 12\r\n")).unwrap();
        assert_eq!(headers.content_length(), Some(12));
        assert!(headers.set_raw_content_length(Bytes::from_static(b"Content-Length: x\r\n")).is_err());
    }

    #[test]
    fn control_bytes_are_rejected_before_storing() {
        let mut headers = ResponseHeaders::new();
        let injected = "ok\r\nSet-Cookie: evil=1";

        assert_eq!(headers.set("X-A", injected), Err(HeaderError::invalid_value("X-A")));
        assert_eq!(headers.add("X-A", injected), Err(HeaderError::invalid_value("X-A")));
        assert_eq!(headers.try_insert("X-A", injected), Err(HeaderError::invalid_value("X-A")));
        assert_eq!(headers.set("Content-Type", injected), Err(HeaderError::invalid_value("Content-Type")));
        assert_eq!(headers.add("Cache-Control", "a\nb"), Err(HeaderError::invalid_value("Cache-Control")));
        assert_eq!(
            headers.set_known(KnownHeader::Server, vec!["fine".to_owned(), "del\x7f".to_owned()]),
            Err(HeaderError::invalid_value("Server"))
        );
        assert_eq!(headers.set("X-B\r\nX-C", "1"), Err(HeaderError::invalid_name("X-B\r\nX-C")));
        assert!(headers.set_raw_server(Bytes::from_static(b"Server: a\r\nX-Evil: 1\r\n")).is_err());
        assert!(headers.set_raw_date(Bytes::from_static(b"Server: x\r\n")).is_err());
        assert!(headers.is_empty());

        headers.set("X-A", "tab\tseparated").unwrap();
        let mut dst = BytesMut::new();
        headers.copy_to(&mut dst);
        assert_eq!(&dst[..], b"X-A: tab\tseparated\r\n");
    }

    #[test]
    fn content_length_holds_one_value() {
        let mut headers = ResponseHeaders::new();
        headers.set_content_length(Some(10)).unwrap();
        assert_eq!(headers.add("Content-Length", "5"), Err(HeaderError::MultipleContentLength));
        assert_eq!(headers.set("Content-Length", vec!["5".to_owned(), "5".to_owned()]), Err(HeaderError::MultipleContentLength));
        assert_eq!(headers.content_length(), Some(10));

        let mut dst = BytesMut::new();
        headers.copy_to(&mut dst);
        assert_eq!(&dst[..], b"Content-Length: 10\r\n");

        headers.remove("Content-Length").unwrap();
        headers.add("content-length", "5").unwrap();
        assert_eq!(headers.content_length(), Some(5));
    }

    #[test]
    fn reset_unfreezes() {
        let mut headers = ResponseHeaders::new();
        headers.set("X-A", "1").unwrap();
        headers.set_read_only();
        headers.reset();
        assert!(!headers.is_read_only());
        assert!(headers.is_empty());
        headers.set("X-B", "2").unwrap();
    }
}
