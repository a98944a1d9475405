//! Flush coordination state machine.
//!
//! ```text
//! Idle --(flushing set accepted)--> Flushing --(applied)--> DropExtra --(next frame)--> Idle
//!                                      \--(failed)--> Idle
//! ```
//!
//! Independently of the state, a frame stamped before the last successful
//! update is always dropped while `drop_on_update` is on.

use serde::{Deserialize, Serialize};

/// Position in the flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushState {
    /// No flush in progress.
    Idle,
    /// Flush signal raised, value not yet applied.
    Flushing,
    /// Value applied; the next fresh frame is the settling frame.
    DropExtra,
}

/// What the mediator does with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameVerdict {
    /// Deliver downstream.
    Pass,
    /// Captured before the last update.
    DropStale,
    /// First frame after an update, dropped while the device settles.
    DropSettling,
}

impl FrameVerdict {
    /// True for [`FrameVerdict::Pass`].
    pub fn is_pass(self) -> bool {
        self == FrameVerdict::Pass
    }
}

/// Tracks one flush cycle and judges frames against it.
#[derive(Debug, Clone)]
pub struct FlushTracker {
    state: FlushState,
    last_update_ns: u64,
    drop_on_update: bool,
    drop_extra_frame: bool,
}

impl FlushTracker {
    /// Idle tracker with the given drop switches.
    pub fn new(drop_on_update: bool, drop_extra_frame: bool) -> Self {
        Self {
            state: FlushState::Idle,
            last_update_ns: 0,
            drop_on_update,
            drop_extra_frame,
        }
    }

    /// Current state.
    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Time of the last applied set, 0 before any.
    pub fn last_update_ns(&self) -> u64 {
        self.last_update_ns
    }

    /// Whether flushing is enabled at all.
    pub fn drop_on_update(&self) -> bool {
        self.drop_on_update
    }

    /// Back to the stream-start state.
    pub fn reset(&mut self) {
        self.state = FlushState::Idle;
        self.last_update_ns = 0;
    }

    /// A set asked for a flush. Returns whether a flush signal must be raised.
    pub fn begin(&mut self, flush_requested: bool) -> bool {
        if flush_requested && self.drop_on_update {
            self.state = FlushState::Flushing;
            true
        } else {
            false
        }
    }

    /// The device accepted a value at `now_ns`.
    pub fn applied(&mut self, now_ns: u64) {
        self.last_update_ns = now_ns;
        self.state = if self.drop_on_update {
            FlushState::DropExtra
        } else {
            FlushState::Idle
        };
    }

    /// The device rejected the value; nothing changed.
    pub fn failed(&mut self) {
        if self.state == FlushState::Flushing {
            self.state = FlushState::Idle;
        }
    }

    /// Judge a frame by its capture time. Consumes the settling drop.
    pub fn admit(&mut self, timestamp_ns: u64) -> FrameVerdict {
        if self.drop_on_update && timestamp_ns < self.last_update_ns {
            return FrameVerdict::DropStale;
        }
        if self.state == FlushState::DropExtra {
            self.state = FlushState::Idle;
            if self.drop_extra_frame {
                return FrameVerdict::DropSettling;
            }
        }
        FrameVerdict::Pass
    }
}
