//! A copyable read position over a chain of segments.
//!
//! The parser never copies the buffered stream into a contiguous array before
//! looking at it. It walks a [`Cursor`] across segment boundaries instead, and
//! only materializes bytes (method, target, header names and values) once their
//! extent is known.

use std::collections::VecDeque;
use std::fmt;
use std::string::FromUtf8Error;

use bytes::Bytes;
use memchr::{memchr, memchr2, memchr3};

use super::Segment;

/// A detached cursor location: block index within the chain plus byte index
/// within that block.
///
/// Positions outlive the borrow of the chain, which lets the consumer hand
/// them back to the inbound queue when committing a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub(crate) block: usize,
    pub(crate) index: usize,
}

/// A `(segment, index)` pair borrowing a segment chain.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    chain: &'a VecDeque<Segment>,
    block: usize,
    index: usize,
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").field("block", &self.block).field("index", &self.index).finish()
    }
}

impl<'a> Cursor<'a> {
    /// A cursor at the first valid byte of `chain`.
    pub fn begin(chain: &'a VecDeque<Segment>) -> Self {
        let index = chain.front().map_or(0, Segment::start);
        Self { chain, block: 0, index }
    }

    /// A cursor just past the last valid byte of `chain`.
    pub fn end(chain: &'a VecDeque<Segment>) -> Self {
        match chain.back() {
            Some(segment) => Self { chain, block: chain.len() - 1, index: segment.end() },
            None => Self { chain, block: 0, index: 0 },
        }
    }

    /// Re-attaches a detached position to `chain`, clamped into the valid range.
    pub fn at(chain: &'a VecDeque<Segment>, position: Position) -> Self {
        match chain.get(position.block) {
            Some(segment) => Self { chain, block: position.block, index: position.index.clamp(segment.start(), segment.end()) },
            None => Self::end(chain),
        }
    }

    #[inline]
    pub fn position(&self) -> Position {
        Position { block: self.block, index: self.index }
    }

    /// Location of the next readable byte, skipping exhausted blocks.
    fn next_readable(&self) -> Option<(usize, usize)> {
        let mut block = self.block;
        let mut index = self.index;
        loop {
            let segment = self.chain.get(block)?;
            if index < segment.end() {
                return Some((block, index));
            }
            block += 1;
            index = self.chain.get(block)?.start();
        }
    }

    pub fn is_end(&self) -> bool {
        self.next_readable().is_none()
    }

    /// Returns the current byte without advancing.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.next_readable().map(|(block, index)| self.chain[block].byte_at(index))
    }

    /// Returns the current byte and advances past it.
    #[inline]
    pub fn take(&mut self) -> Option<u8> {
        let (block, index) = self.next_readable()?;
        self.block = block;
        self.index = index + 1;
        Some(self.chain[block].byte_at(index))
    }

    /// Advances by exactly `n` bytes. Returns `false` and leaves the cursor
    /// untouched if fewer than `n` bytes remain.
    pub fn skip(&mut self, n: usize) -> bool {
        let mut remaining = n;
        let mut block = self.block;
        let mut index = self.index;
        while remaining > 0 {
            let Some(segment) = self.chain.get(block) else {
                return false;
            };
            let available = segment.end() - index;
            if available >= remaining {
                index += remaining;
                remaining = 0;
            } else {
                remaining -= available;
                block += 1;
                match self.chain.get(block) {
                    Some(next) => index = next.start(),
                    None => return false,
                }
            }
        }
        self.block = block;
        self.index = index;
        true
    }

    /// Advances to the first occurrence of any byte in `targets` and returns it.
    ///
    /// Up to three targets are searched with vectorized `memchr`; more fall back
    /// to a scalar scan. When nothing is found the cursor ends up at the end of
    /// the chain.
    pub fn seek(&mut self, targets: &[u8]) -> Option<u8> {
        let mut block = self.block;
        let mut index = self.index;
        while let Some(segment) = self.chain.get(block) {
            let haystack = segment.slice(index, segment.end());
            if let Some(offset) = find_any(targets, haystack) {
                self.block = block;
                self.index = index + offset;
                return Some(haystack[offset]);
            }
            if block + 1 >= self.chain.len() {
                self.block = block;
                self.index = segment.end();
                return None;
            }
            block += 1;
            index = self.chain[block].start();
        }
        None
    }

    /// Compares `pattern` with the bytes at the cursor without advancing.
    ///
    /// Returns `None` when fewer bytes than the pattern are buffered and all of
    /// them matched, i.e. more input is needed to decide.
    pub fn starts_with(&self, pattern: &[u8]) -> Option<bool> {
        if let Some((block, index)) = self.next_readable() {
            let segment = &self.chain[block];
            if segment.end() - index >= pattern.len() {
                return Some(segment.slice(index, index + pattern.len()) == pattern);
            }
        }

        let mut ahead = *self;
        for &expected in pattern {
            match ahead.take() {
                Some(b) if b == expected => {}
                Some(_) => return Some(false),
                None => return None,
            }
        }
        Some(true)
    }

    /// The contiguous bytes from the cursor to the end of its block, skipping
    /// exhausted blocks. Empty at the end of the chain.
    pub fn chunk(&self) -> &'a [u8] {
        match self.next_readable() {
            Some((block, index)) => {
                let segment = &self.chain[block];
                segment.slice(index, segment.end())
            }
            None => &[],
        }
    }

    /// Number of bytes in `[self, end)`.
    pub fn distance(&self, end: &Cursor<'_>) -> usize {
        let mut total = 0;
        self.for_each_slice(end, |slice| total += slice.len());
        total
    }

    fn for_each_slice<F: FnMut(&'a [u8])>(&self, end: &Cursor<'_>, mut f: F) {
        let mut block = self.block;
        let mut index = self.index;
        while let Some(segment) = self.chain.get(block) {
            if block == end.block {
                if end.index > index {
                    f(segment.slice(index, end.index));
                }
                return;
            }
            if block > end.block {
                return;
            }
            f(segment.slice(index, segment.end()));
            block += 1;
            index = self.chain.get(block).map_or(0, Segment::start);
        }
    }

    /// Number of bytes from the cursor to the end of the chain.
    pub fn remaining(&self) -> usize {
        self.distance(&Cursor::end(self.chain))
    }

    /// Copies `[self, end)` into a vector.
    pub fn to_vec(&self, end: &Cursor<'_>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.distance(end));
        self.for_each_slice(end, |slice| out.extend_from_slice(slice));
        out
    }

    /// Copies `[self, end)` into `Bytes`.
    pub fn to_bytes(&self, end: &Cursor<'_>) -> Bytes {
        Bytes::from(self.to_vec(end))
    }

    /// Materializes `[self, end)` as a string if every byte is ASCII.
    pub fn ascii(&self, end: &Cursor<'_>) -> Option<String> {
        let bytes = self.to_vec(end);
        if bytes.is_ascii() { String::from_utf8(bytes).ok() } else { None }
    }

    /// Materializes `[self, end)` as UTF-8.
    pub fn utf8(&self, end: &Cursor<'_>) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.to_vec(end))
    }
}

#[inline]
fn find_any(targets: &[u8], haystack: &[u8]) -> Option<usize> {
    match *targets {
        [] => None,
        [a] => memchr(a, haystack),
        [a, b] => memchr2(a, b, haystack),
        [a, b, c] => memchr3(a, b, c, haystack),
        _ => haystack.iter().position(|b| targets.contains(b)),
    }
}
