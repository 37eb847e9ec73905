//! The outbound side of a connection.
//!
//! Response bytes are first encoded into a pending buffer with
//! [`SocketOutput::write_with`] or [`SocketOutput::write`], then handed to the
//! writer pump through a bounded channel by [`SocketOutput::flush`]. A full
//! channel suspends the flushing request, so a slow client stalls its own
//! response instead of growing memory.

use std::io;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::SendError;
use crate::utils::lock;

/// How the transport is closed once the connection is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceEndType {
    /// Write everything queued, then shut down the write half.
    SocketShutdown,
    /// Close right away, dropping whatever is still queued.
    SocketDisconnect,
}

#[derive(Debug)]
pub struct SocketOutput {
    sender: mpsc::Sender<Bytes>,
    pending: Mutex<BytesMut>,
    end_type: Mutex<Option<ProduceEndType>>,
    ended: CancellationToken,
    disconnected: CancellationToken,
}

/// Receiving half of the outbound channel, drained by [`OutputReceiver::pump`].
#[derive(Debug)]
pub struct OutputReceiver {
    receiver: mpsc::Receiver<Bytes>,
}

impl SocketOutput {
    /// Creates the output and its receiver; `capacity` bounds the number of
    /// flushed writes waiting for the transport.
    pub fn channel(capacity: usize) -> (Arc<SocketOutput>, OutputReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let output = SocketOutput {
            sender,
            pending: Mutex::new(BytesMut::new()),
            end_type: Mutex::new(None),
            ended: CancellationToken::new(),
            disconnected: CancellationToken::new(),
        };
        (Arc::new(output), OutputReceiver { receiver })
    }

    /// Appends to the pending buffer without waiting.
    pub fn write(&self, bytes: &[u8]) {
        lock(&self.pending).extend_from_slice(bytes);
    }

    /// Encodes straight into the pending buffer.
    pub fn write_with<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut BytesMut) -> T,
    {
        f(&mut lock(&self.pending))
    }

    /// Number of bytes written but not flushed yet.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Hands the pending bytes to the writer pump, waiting for channel capacity.
    pub async fn flush(&self) -> Result<(), SendError> {
        if self.ended.is_cancelled() {
            return Err(SendError::Closed);
        }

        let bytes = {
            let mut pending = lock(&self.pending);
            if pending.is_empty() {
                return Ok(());
            }
            pending.split().freeze()
        };

        select! {
            sent = self.sender.send(bytes) => sent.map_err(|_closed| SendError::Closed),
            () = self.ended.cancelled() => Err(SendError::Aborted),
        }
    }

    pub async fn write_async(&self, bytes: &[u8]) -> Result<(), SendError> {
        self.write(bytes);
        self.flush().await
    }

    /// Ends the output. Only the first call counts.
    pub fn end(&self, end_type: ProduceEndType) {
        {
            let mut current = lock(&self.end_type);
            if current.is_some() {
                return;
            }
            *current = Some(end_type);
        }
        trace!(?end_type, "output ended");
        if end_type == ProduceEndType::SocketDisconnect {
            self.disconnected.cancel();
        }
        self.ended.cancel();
    }

    pub fn end_type(&self) -> Option<ProduceEndType> {
        *lock(&self.end_type)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    fn take_pending(&self) -> Bytes {
        lock(&self.pending).split().freeze()
    }
}

impl OutputReceiver {
    /// Copies flushed writes to `writer` until the output ends.
    ///
    /// On [`ProduceEndType::SocketShutdown`] everything still queued or pending
    /// is written before the write half is shut down. A disconnect interrupts
    /// any write in progress, even one blocked on a peer that stopped reading.
    pub async fn pump<W>(mut self, output: &SocketOutput, mut writer: W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let drained = select! {
            biased;
            () = output.disconnected.cancelled() => false,
            drained = self.drain(output, &mut writer) => drained?,
        };

        if !drained {
            debug!("disconnecting without flushing queued output");
        }
        Ok(())
    }

    async fn drain<W>(&mut self, output: &SocketOutput, writer: &mut W) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            select! {
                biased;
                () = output.ended.cancelled() => break,
                received = self.receiver.recv() => match received {
                    Some(bytes) => {
                        writer.write_all(&bytes).await?;
                        if self.receiver.is_empty() {
                            writer.flush().await?;
                        }
                    }
                    None => break,
                },
            }
        }

        if output.end_type() == Some(ProduceEndType::SocketDisconnect) {
            return Ok(false);
        }

        while let Ok(bytes) = self.receiver.try_recv() {
            writer.write_all(&bytes).await?;
        }
        let rest = output.take_pending();
        if !rest.is_empty() {
            writer.write_all(&rest).await?;
        }
        writer.flush().await?;
        writer.shutdown().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn flushed_bytes_reach_the_writer() {
        let (output, receiver) = SocketOutput::channel(4);
        let (client, server) = tokio::io::duplex(64);

        let pump = tokio::spawn({
            let output = Arc::clone(&output);
            async move { receiver.pump(&output, server).await }
        });

        output.write(b"HTTP/1.1 ");
        output.write_async(b"200 OK\r\n").await.unwrap();
        output.write(b"tail");
        output.end(ProduceEndType::SocketShutdown);
        pump.await.unwrap().unwrap();

        let mut received = String::new();
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "HTTP/1.1 200 OK\r\ntail");
    }

    #[tokio::test]
    async fn end_is_first_wins() {
        let (output, _receiver) = SocketOutput::channel(1);
        output.end(ProduceEndType::SocketShutdown);
        output.end(ProduceEndType::SocketDisconnect);
        assert_eq!(output.end_type(), Some(ProduceEndType::SocketShutdown));
        assert!(matches!(output.write_async(b"late").await, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn full_channel_applies_backpressure() {
        let (output, mut receiver) = SocketOutput::channel(1);
        output.write_async(b"first").await.unwrap();

        let mut second = Box::pin(output.write_async(b"second"));
        assert!(futures::poll!(second.as_mut()).is_pending());

        assert_eq!(receiver.receiver.recv().await.unwrap(), Bytes::from_static(b"first"));
        second.await.unwrap();
        assert_eq!(receiver.receiver.recv().await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn disconnect_drops_queued_output() {
        let (output, receiver) = SocketOutput::channel(4);
        let (mut client, server) = tokio::io::duplex(64);
        output.write_async(b"never sent").await.unwrap();
        output.end(ProduceEndType::SocketDisconnect);

        receiver.pump(&output, server).await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn disconnect_interrupts_a_blocked_write() {
        let (output, receiver) = SocketOutput::channel(4);
        // the client half is kept but never read
        let (_client, server) = tokio::io::duplex(64);

        let pump = tokio::spawn({
            let output = Arc::clone(&output);
            async move { receiver.pump(&output, server).await }
        });

        output.write_async(&[b'x'; 64 * 1024]).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!pump.is_finished());

        output.end(ProduceEndType::SocketDisconnect);
        let finished = tokio::time::timeout(std::time::Duration::from_secs(3), pump).await;
        finished.expect("pump stays blocked after disconnect").unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_a_slow_reader() {
        let (output, receiver) = SocketOutput::channel(4);
        let (mut client, server) = tokio::io::duplex(64);

        let pump = tokio::spawn({
            let output = Arc::clone(&output);
            async move { receiver.pump(&output, server).await }
        });

        output.write_async(&[b'y'; 4096]).await.unwrap();
        output.end(ProduceEndType::SocketShutdown);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        pump.await.unwrap().unwrap();
        assert_eq!(received.len(), 4096);
    }
}
