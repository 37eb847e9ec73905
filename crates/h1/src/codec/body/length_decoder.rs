use bytes::Bytes;

use super::PayloadItem;
use crate::buffer::Cursor;

/// Reads exactly `length` body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn remaining(&self) -> u64 {
        self.length
    }

    pub fn decode(&mut self, cursor: &mut Cursor<'_>) -> Option<PayloadItem> {
        if self.length == 0 {
            return Some(PayloadItem::Eof);
        }

        let available = cursor.chunk();
        if available.is_empty() {
            return None;
        }

        let len = usize::try_from(self.length).map_or(available.len(), |l| l.min(available.len()));
        let bytes = Bytes::copy_from_slice(&available[..len]);
        cursor.skip(len);

        self.length -= len as u64;
        Some(PayloadItem::Chunk(bytes))
    }
}
