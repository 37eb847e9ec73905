//! Pooled memory segments for inbound bytes.
//!
//! A [`SegmentPool`] hands out fixed-size [`Segment`]s. A segment is an owning
//! handle: it is moved from the producer side of a queue to the consumer side
//! and gives its block back to the pool when dropped. Segments are never
//! shared, so no segment is ever mutated from two places at once.
//!
//! [`Cursor`] is the read-side view over a chain of segments.

pub(crate) mod cursor;

pub use cursor::Cursor;
pub use cursor::Position;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::utils::lock;

/// Default capacity of one segment in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 4 * 1024;

/// Default number of free blocks a pool keeps around for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 1024;

/// A thread-safe pool of fixed-size byte blocks.
///
/// Cloning a pool is cheap and yields a handle to the same blocks.
#[derive(Clone, Debug)]
pub struct SegmentPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    segment_size: usize,
    max_retained: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    leased: AtomicUsize,
}

impl fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolInner")
            .field("segment_size", &self.segment_size)
            .field("max_retained", &self.max_retained)
            .field("leased", &self.leased.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentPool {
    pub fn new() -> Self {
        Self::with_segment_size(DEFAULT_SEGMENT_SIZE, DEFAULT_MAX_RETAINED)
    }

    /// Creates a pool whose segments hold `segment_size` bytes, keeping at most
    /// `max_retained` returned blocks for reuse.
    pub fn with_segment_size(segment_size: usize, max_retained: usize) -> Self {
        let segment_size = segment_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                segment_size,
                max_retained,
                free: Mutex::new(Vec::new()),
                leased: AtomicUsize::new(0),
            }),
        }
    }

    /// Leases an empty segment, reusing a returned block when one is available.
    pub fn lease(&self) -> Segment {
        let block = lock(&self.inner.free).pop().unwrap_or_else(|| vec![0u8; self.inner.segment_size].into_boxed_slice());
        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        Segment { block, start: 0, end: 0, pool: Arc::clone(&self.inner) }
    }

    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }

    /// Number of segments currently leased and not yet returned.
    pub fn leased(&self) -> usize {
        self.inner.leased.load(Ordering::Relaxed)
    }

    /// Number of returned blocks waiting for reuse.
    pub fn available(&self) -> usize {
        lock(&self.inner.free).len()
    }
}

impl PoolInner {
    fn give_back(&self, block: Box<[u8]>) {
        self.leased.fetch_sub(1, Ordering::Relaxed);
        let mut free = lock(&self.free);
        if free.len() < self.max_retained {
            free.push(block);
        }
    }
}

/// A fixed-capacity block holding the valid bytes `[start, end)`.
pub struct Segment {
    block: Box<[u8]>,
    start: usize,
    end: usize,
    pool: Arc<PoolInner>,
}

impl Segment {
    /// The valid bytes of this segment.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.block[self.start..self.end]
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    /// Free space after `end`.
    #[inline]
    pub fn writable(&self) -> usize {
        self.block.len() - self.end
    }

    /// Copies as much of `bytes` as fits after `end`, returning the amount copied.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.writable());
        self.block[self.end..self.end + n].copy_from_slice(&bytes[..n]);
        self.end += n;
        n
    }

    /// Drops the bytes before `start`; they have been consumed.
    pub(crate) fn set_start(&mut self, start: usize) {
        debug_assert!(start >= self.start && start <= self.end, "start {start} out of range");
        self.start = start.clamp(self.start, self.end);
    }

    #[inline]
    pub(crate) fn byte_at(&self, index: usize) -> u8 {
        self.block[index]
    }

    #[inline]
    pub(crate) fn slice(&self, from: usize, to: usize) -> &[u8] {
        &self.block[from..to]
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment").field("start", &self.start).field("end", &self.end).field("capacity", &self.block.len()).finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        let block = std::mem::take(&mut self.block);
        if !block.is_empty() {
            self.pool.give_back(block);
        }
    }
}
