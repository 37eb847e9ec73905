use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use super::PayloadItem;
use crate::protocol::SendError;

/// Writes body bytes verbatim while holding them to a declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    declared: u64,
    written: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { declared: length, written: 0 }
    }

    pub fn is_finish(&self) -> bool {
        self.written == self.declared
    }

    /// Bytes still owed to the declared length.
    pub fn remaining(&self) -> u64 {
        self.declared - self.written
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }
                let len = bytes.remaining() as u64;
                if self.written + len > self.declared {
                    warn!(declared = self.declared, written = self.written + len, "response body exceeds Content-Length");
                    return Err(SendError::TooManyBytes { declared: self.declared, written: self.written + len });
                }
                dst.put(bytes);
                self.written += len;
                Ok(())
            }
            PayloadItem::Eof => Ok(()),
        }
    }
}
