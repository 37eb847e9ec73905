use super::{HeaderTable, HeaderValues, Iter, KnownHeader};
use crate::protocol::HeaderError;

/// Headers of the request being processed.
///
/// Filled by the header parser, then handed to the application read-mostly.
/// Reset between pipelined requests.
#[derive(Clone, Debug, Default)]
pub struct RequestHeaders {
    table: HeaderTable,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values of `name`, empty when the header is absent.
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

    pub fn set<V: Into<HeaderValues>>(&mut self, name: &str, values: V) {
        self.table.set(name, values.into());
    }

    /// Appends a value, keeping the values already present.
    pub fn add<S: Into<String>>(&mut self, name: &str, value: S) {
        self.table.add(name, value.into());
    }

    /// Adds a header that must not be present yet.
    pub fn try_insert<V: Into<HeaderValues>>(&mut self, name: &str, values: V) -> Result<(), HeaderError> {
        if self.table.contains(name) {
            return Err(HeaderError::duplicate(name));
        }
        self.table.set(name, values.into());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValues> {
        self.table.remove(name)
    }

    pub fn clear(&mut self) {
        self.table.clear();
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

    pub(crate) fn append_continuation(&mut self, name: &str, continuation: &str) -> bool {
        match self.table.last_value_mut(name) {
            Some(value) => {
                value.push(' ');
                value.push_str(continuation);
                true
            }
            None => false,
        }
    }
}

impl<'a> IntoIterator for &'a RequestHeaders {
    type Item = (&'a str, &'a HeaderValues);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
