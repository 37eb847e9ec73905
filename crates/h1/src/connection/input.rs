//! The inbound byte queue of a connection.
//!
//! The transport pushes bytes with [`SocketInput::incoming_data`]; the
//! processing loop and the request body read them back through consuming
//! transactions:
//!
//! 1. await [`SocketInput::ready`] (or poll it with [`SocketInput::poll_ready`]),
//! 2. check out the buffered chain with [`SocketInput::consuming_start`],
//! 3. walk it with a [`Cursor`],
//! 4. commit with [`Consuming::complete`], passing how far the bytes were
//!    consumed and how far they were examined.
//!
//! There is exactly one reader per connection. A second concurrent waiter is
//! a fault that poisons the queue.
//!
//! The transport side can hold off with [`SocketInput::wait_below`] while too
//! many received bytes are still unconsumed.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

use tokio::sync::Notify;
use tracing::trace;

use crate::buffer::{Cursor, Position, Segment, SegmentPool};
use crate::protocol::InputError;
use crate::utils::lock;

#[derive(Debug)]
pub struct SocketInput {
    pool: SegmentPool,
    state: Mutex<InputState>,
    drained: Notify,
}

#[derive(Debug, Default)]
struct InputState {
    segments: VecDeque<Segment>,
    // bytes held by the current consuming transaction
    checked_out: usize,
    consuming: bool,
    fin: bool,
    error: Option<InputError>,
    data_available: bool,
    arrived_while_consuming: bool,
    waiter: Option<Waiter>,
    next_waiter_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    waker: Waker,
}

/// Identifies one reader awaiting the queue.
///
/// A reader keeps the same interest across polls; the queue tells repeated
/// polls of one reader apart from a second reader this way.
#[derive(Debug, Default)]
pub struct ReadInterest {
    id: Option<u64>,
}

impl SocketInput {
    pub fn new(pool: SegmentPool) -> Self {
        Self { pool, state: Mutex::new(InputState::default()), drained: Notify::new() }
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Appends bytes received from the transport. An empty slice marks the end
    /// of the stream.
    pub fn incoming_data(&self, bytes: &[u8]) {
        let waker = {
            let mut state = lock(&self.state);
            if state.error.is_some() {
                return;
            }

            if bytes.is_empty() {
                state.fin = true;
            } else {
                let mut rest = bytes;
                while !rest.is_empty() {
                    let needs_segment = state.segments.back().is_none_or(|segment| segment.writable() == 0);
                    if needs_segment {
                        state.segments.push_back(self.pool.lease());
                    }
                    if let Some(segment) = state.segments.back_mut() {
                        let written = segment.write(rest);
                        rest = &rest[written..];
                    }
                }
            }

            state.data_available = true;
            if state.consuming {
                state.arrived_while_consuming = true;
            }
            state.waiter.take()
        };

        if let Some(waiter) = waker {
            waiter.waker.wake();
        }
    }

    /// Records a transport read fault. The current waiter and every later await
    /// fail with it.
    pub fn incoming_error(&self, error: io::Error) {
        trace!(cause = %error, "inbound transport error");
        self.fail(InputError::io(error));
    }

    /// Cancels every pending and future read.
    pub fn abort(&self) {
        self.fail(InputError::Aborted);
    }

    fn fail(&self, error: InputError) {
        let waiter = {
            let mut state = lock(&self.state);
            if state.error.is_none() {
                state.error = Some(error);
            }
            state.waiter.take()
        };

        if let Some(waiter) = waiter {
            waiter.waker.wake();
        }
        self.drained.notify_waiters();
    }

    /// Whether the transport signalled end of stream.
    pub fn is_completed(&self) -> bool {
        lock(&self.state).fin
    }

    /// `Ok(true)` when the stream has ended and nothing is left to read.
    pub fn check_fin_or_error(&self) -> Result<bool, InputError> {
        let state = lock(&self.state);
        if let Some(error) = &state.error {
            return Err(error.clone());
        }
        Ok(state.fin && !state.consuming && state.segments.is_empty())
    }

    /// Number of buffered bytes not yet consumed, including those checked out
    /// by a running transaction.
    pub fn buffered(&self) -> usize {
        lock(&self.state).buffered()
    }

    /// Resolves once fewer than `limit` bytes are buffered, or the queue has
    /// failed.
    pub async fn wait_below(&self, limit: usize) {
        loop {
            let drained = self.drained.notified();
            let mut drained = std::pin::pin!(drained);
            drained.as_mut().enable();
            {
                let state = lock(&self.state);
                if state.error.is_some() || state.buffered() < limit {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Waits until bytes, end of stream or an error are available.
    pub fn ready(&self) -> Ready<'_> {
        Ready { input: self, interest: ReadInterest::default() }
    }

    /// Poll form of [`SocketInput::ready`] for readers that are themselves
    /// polled, such as the request body.
    pub fn poll_ready(&self, interest: &mut ReadInterest, cx: &mut Context<'_>) -> Poll<Result<(), InputError>> {
        let mut state = lock(&self.state);

        if let Some(error) = &state.error {
            let error = error.clone();
            if state.waiter.as_ref().is_some_and(|w| Some(w.id) == interest.id) {
                state.waiter = None;
            }
            return Poll::Ready(Err(error));
        }

        if state.data_available || state.fin {
            if state.waiter.as_ref().is_some_and(|w| Some(w.id) == interest.id) {
                state.waiter = None;
            }
            return Poll::Ready(Ok(()));
        }

        let registered = state.waiter.as_ref().map(|w| w.id);
        match registered {
            Some(id) if Some(id) == interest.id => {
                if let Some(waiter) = state.waiter.as_mut()
                    && !waiter.waker.will_wake(cx.waker())
                {
                    waiter.waker.clone_from(cx.waker());
                }
                Poll::Pending
            }
            Some(_) => {
                let other = state.waiter.take();
                state.error = Some(InputError::ConcurrentRead);
                drop(state);
                if let Some(other) = other {
                    other.waker.wake();
                }
                Poll::Ready(Err(InputError::ConcurrentRead))
            }
            None => {
                let id = match interest.id {
                    Some(id) => id,
                    None => {
                        let id = state.next_waiter_id;
                        state.next_waiter_id += 1;
                        interest.id = Some(id);
                        id
                    }
                };
                state.waiter = Some(Waiter { id, waker: cx.waker().clone() });
                Poll::Pending
            }
        }
    }

    /// Withdraws a registered interest, typically because the reader was dropped
    /// while waiting.
    pub fn release(&self, interest: &mut ReadInterest) {
        let Some(id) = interest.id.take() else {
            return;
        };
        let mut state = lock(&self.state);
        if state.waiter.as_ref().is_some_and(|w| w.id == id) {
            state.waiter = None;
        }
    }

    /// Checks out all buffered bytes for one consuming transaction.
    pub fn consuming_start(&self) -> Result<Consuming<'_>, InputError> {
        let mut state = lock(&self.state);
        if state.consuming {
            return Err(InputError::ConsumingInProgress);
        }
        state.consuming = true;
        state.arrived_while_consuming = false;
        let chain = std::mem::take(&mut state.segments);
        state.checked_out = chain.iter().map(Segment::len).sum();
        let fin = state.fin;
        Ok(Consuming { input: self, chain, fin, examined_all: false })
    }
}

impl InputState {
    fn buffered(&self) -> usize {
        self.checked_out + self.segments.iter().map(Segment::len).sum::<usize>()
    }
}

/// Future returned by [`SocketInput::ready`].
#[derive(Debug)]
pub struct Ready<'a> {
    input: &'a SocketInput,
    interest: ReadInterest,
}

impl Future for Ready<'_> {
    type Output = Result<(), InputError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.input.poll_ready(&mut this.interest, cx)
    }
}

impl Drop for Ready<'_> {
    fn drop(&mut self) {
        self.input.release(&mut self.interest);
    }
}

/// An in-flight consuming transaction.
///
/// Dropping it without calling [`Consuming::complete`] rewinds: every byte
/// stays buffered.
#[derive(Debug)]
pub struct Consuming<'a> {
    input: &'a SocketInput,
    chain: VecDeque<Segment>,
    fin: bool,
    examined_all: bool,
}

impl Consuming<'_> {
    /// A cursor at the first unconsumed byte.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::begin(&self.chain)
    }

    /// A cursor past the last buffered byte.
    pub fn end(&self) -> Cursor<'_> {
        Cursor::end(&self.chain)
    }

    /// Whether end of stream had been signalled when the transaction started.
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    pub fn is_empty(&self) -> bool {
        self.chain.iter().all(Segment::is_empty)
    }

    /// Commits the transaction: bytes before `consumed` are released, bytes up
    /// to `examined` need not be looked at again until more data arrives.
    pub fn complete(mut self, consumed: Position, examined: Position) {
        self.examined_all = Cursor::at(&self.chain, examined).is_end();

        let consumed_cursor = Cursor::at(&self.chain, consumed);
        let consumed = consumed_cursor.position();
        let fully_consumed = consumed_cursor.is_end();

        if fully_consumed {
            self.chain.clear();
        } else {
            self.chain.drain(..consumed.block);
            if let Some(front) = self.chain.front_mut() {
                front.set_start(consumed.index);
                if front.is_empty() {
                    self.chain.pop_front();
                }
            }
        }
        // dropping self relinks the remaining tail
    }
}

impl Drop for Consuming<'_> {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.input.state);
            let tail = std::mem::take(&mut self.chain);
            for segment in tail.into_iter().rev() {
                state.segments.push_front(segment);
            }

            if self.examined_all && !state.arrived_while_consuming && !state.fin && state.error.is_none() {
                state.data_available = false;
            }
            state.arrived_while_consuming = false;
            state.consuming = false;
            state.checked_out = 0;
        }
        self.input.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;

    use futures::{FutureExt, poll};

    use super::*;

    fn input(segment_size: usize) -> SocketInput {
        SocketInput::new(SegmentPool::with_segment_size(segment_size, 16))
    }

    #[tokio::test]
    async fn partial_consume_keeps_the_tail() {
        let input = input(4);
        input.incoming_data(b"GET / HTTP/1.1");
        input.ready().await.unwrap();

        let consuming = input.consuming_start().unwrap();
        let mut cursor = consuming.cursor();
        assert_eq!(cursor.seek(b" "), Some(b' '));
        cursor.take();
        let position = cursor.position();
        consuming.complete(position, position);

        assert_eq!(input.buffered(), 10);
        let consuming = input.consuming_start().unwrap();
        let text = consuming.cursor().ascii(&consuming.end()).unwrap();
        assert_eq!(text, "/ HTTP/1.1");
    }

    #[tokio::test]
    async fn examined_to_end_blocks_until_more_data() {
        let input = input(8);
        input.incoming_data(b"GET");
        input.ready().await.unwrap();

        let consuming = input.consuming_start().unwrap();
        let begin = consuming.cursor().position();
        let end = consuming.end().position();
        consuming.complete(begin, end);

        assert!(input.ready().now_or_never().is_none());
        assert_eq!(input.buffered(), 3);

        input.incoming_data(b" / HTTP/1.1\r\n");
        assert!(input.ready().now_or_never().is_some());
        assert_eq!(input.buffered(), 16);
    }

    #[tokio::test]
    async fn dropping_a_transaction_rewinds() {
        let input = input(8);
        input.incoming_data(b"hello");
        {
            let consuming = input.consuming_start().unwrap();
            assert!(!consuming.is_empty());
        }
        assert_eq!(input.buffered(), 5);
        assert!(input.ready().now_or_never().is_some());
    }

    #[test]
    fn overlapping_transactions_fail() {
        let input = input(8);
        input.incoming_data(b"x");
        let first = input.consuming_start().unwrap();
        assert!(matches!(input.consuming_start(), Err(InputError::ConsumingInProgress)));
        drop(first);
        assert!(input.consuming_start().is_ok());
    }

    #[tokio::test]
    async fn data_arriving_during_a_transaction_is_kept_in_order() {
        let input = input(4);
        input.incoming_data(b"abcd");
        let consuming = input.consuming_start().unwrap();
        input.incoming_data(b"efgh");

        let end = consuming.end().position();
        let mut cursor = consuming.cursor();
        cursor.skip(2);
        let consumed = cursor.position();
        consuming.complete(consumed, end);

        // new data arrived, so the reader is not blocked
        assert!(input.ready().now_or_never().is_some());
        let consuming = input.consuming_start().unwrap();
        assert_eq!(consuming.cursor().ascii(&consuming.end()).unwrap(), "cdefgh");
    }

    #[tokio::test]
    async fn second_waiter_poisons_the_queue() {
        let input = input(8);
        let mut first = pin!(input.ready());
        assert!(poll!(first.as_mut()).is_pending());

        let second = input.ready().await;
        assert!(matches!(second, Err(InputError::ConcurrentRead)));
        assert!(matches!(first.await, Err(InputError::ConcurrentRead)));

        input.incoming_data(b"late");
        assert!(matches!(input.ready().await, Err(InputError::ConcurrentRead)));
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_poison() {
        let input = input(8);
        {
            let mut first = pin!(input.ready());
            assert!(poll!(first.as_mut()).is_pending());
        }
        input.incoming_data(b"x");
        assert!(input.ready().await.is_ok());
    }

    #[tokio::test]
    async fn abort_wakes_the_waiter() {
        let input = input(8);
        let mut waiting = pin!(input.ready());
        assert!(poll!(waiting.as_mut()).is_pending());

        input.abort();
        assert!(matches!(waiting.await, Err(InputError::Aborted)));
        assert!(matches!(input.check_fin_or_error(), Err(InputError::Aborted)));
    }

    #[tokio::test]
    async fn transport_errors_fail_reads() {
        let input = input(8);
        input.incoming_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(input.ready().await, Err(InputError::Io(_))));
    }

    #[tokio::test]
    async fn end_of_stream() {
        let input = input(8);
        input.incoming_data(b"");
        input.ready().await.unwrap();
        assert!(input.is_completed());
        assert!(input.check_fin_or_error().unwrap());

        let consuming = input.consuming_start().unwrap();
        assert!(consuming.is_fin());
        assert!(consuming.is_empty());
    }

    #[tokio::test]
    async fn consumed_segments_return_to_the_pool() {
        let input = input(4);
        input.incoming_data(b"0123456789");
        assert_eq!(input.pool().leased(), 3);

        let consuming = input.consuming_start().unwrap();
        let end = consuming.end().position();
        consuming.complete(end, end);
        assert_eq!(input.pool().leased(), 0);
        assert_eq!(input.buffered(), 0);
    }

    #[tokio::test]
    async fn wait_below_resolves_once_consumed() {
        let input = input(4);
        input.incoming_data(b"0123456789");
        assert!(input.wait_below(11).now_or_never().is_some());

        let mut waiting = pin!(input.wait_below(8));
        assert!(poll!(waiting.as_mut()).is_pending());

        let consuming = input.consuming_start().unwrap();
        // checked out bytes still count
        assert_eq!(input.buffered(), 10);
        let mut cursor = consuming.cursor();
        cursor.skip(2);
        let position = cursor.position();
        consuming.complete(position, position);
        assert!(poll!(waiting.as_mut()).is_pending());

        let consuming = input.consuming_start().unwrap();
        let mut cursor = consuming.cursor();
        cursor.skip(1);
        let position = cursor.position();
        consuming.complete(position, position);
        assert_eq!(input.buffered(), 7);
        assert!(poll!(waiting.as_mut()).is_ready());
    }

    #[tokio::test]
    async fn wait_below_ends_on_abort() {
        let input = input(4);
        input.incoming_data(b"0123456789");
        let mut waiting = pin!(input.wait_below(4));
        assert!(poll!(waiting.as_mut()).is_pending());

        input.abort();
        assert!(poll!(waiting.as_mut()).is_ready());
    }
}
