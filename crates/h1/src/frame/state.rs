//! Connection lifecycle states.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::options::ServerOptions;

/// Lifecycle state of a connection, ordered by its numeric value.
///
/// `Stopping`, `Timeout`, `Stopped` and `Aborted` can be entered from any lower
/// state and never left; the only way back down is re-entering `Waiting` from
/// `NotStarted`, `ExecutingRequest` or `UpgradedRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum FrameState {
    NotStarted = -1,
    Waiting = 0,
    ReadingHeaders = 1,
    ExecutingRequest = 2,
    UpgradedRequest = 3,
    Stopping = 99,
    Timeout = 408,
    Stopped = 1000,
    Aborted = 1001,
}

impl FrameState {
    fn from_i32(value: i32) -> Self {
        match value {
            -1 => FrameState::NotStarted,
            0 => FrameState::Waiting,
            1 => FrameState::ReadingHeaders,
            2 => FrameState::ExecutingRequest,
            3 => FrameState::UpgradedRequest,
            99 => FrameState::Stopping,
            408 => FrameState::Timeout,
            1000 => FrameState::Stopped,
            1001 => FrameState::Aborted,
            _ => unreachable!("invalid frame state {value}"),
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_enter(self, to: FrameState) -> bool {
        match to {
            FrameState::NotStarted => false,
            FrameState::Waiting => {
                matches!(self, FrameState::NotStarted | FrameState::ExecutingRequest | FrameState::UpgradedRequest)
            }
            FrameState::ReadingHeaders => self == FrameState::Waiting,
            FrameState::ExecutingRequest => self == FrameState::ReadingHeaders,
            FrameState::UpgradedRequest => self == FrameState::ExecutingRequest,
            FrameState::Stopping | FrameState::Timeout | FrameState::Stopped | FrameState::Aborted => self < to,
        }
    }

    /// How long the connection may stay in this state, `None` for no timer.
    pub fn timeout(self, options: &ServerOptions) -> Option<Duration> {
        if !options.timeouts_enabled() {
            return None;
        }
        match self {
            FrameState::Waiting => Some(options.keep_alive_timeout()),
            FrameState::ReadingHeaders => Some(options.request_headers_timeout()),
            FrameState::ExecutingRequest => options.execution_timeout(),
            _ => None,
        }
    }

    /// `Timeout`, `Stopped` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        self >= FrameState::Timeout
    }
}

/// An atomically updated [`FrameState`].
#[derive(Debug)]
pub struct FrameStateCell(AtomicI32);

impl Default for FrameStateCell {
    fn default() -> Self {
        Self(AtomicI32::new(FrameState::NotStarted as i32))
    }
}

impl FrameStateCell {
    pub fn load(&self) -> FrameState {
        FrameState::from_i32(self.0.load(Ordering::Acquire))
    }

    /// Moves to `to` if the transition is legal from the current state.
    ///
    /// Returns `Ok(previous)` on success and `Err(current)`, with the state
    /// untouched, otherwise.
    pub fn transition(&self, to: FrameState) -> Result<FrameState, FrameState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                FrameState::from_i32(current).can_enter(to).then_some(to as i32)
            })
            .map(FrameState::from_i32)
            .map_err(FrameState::from_i32)
    }
}
