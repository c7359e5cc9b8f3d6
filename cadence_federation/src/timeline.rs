//! Per-federate time-management tracks: regulation, constraint and the
//! advance request in flight. Pure state; the kernel drives the transitions
//! and enforces the forbidden-arrow errors.

use cadence_core::LogicalTime;

/// The five advance primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    TimeAdvanceRequest,
    TimeAdvanceRequestAvailable,
    NextMessageRequest,
    NextMessageRequestAvailable,
    FlushQueueRequest,
}

impl AdvanceMode {
    /// The *available* flavors permit arrivals (and sends, at zero
    /// lookahead) exactly at the granted time.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            AdvanceMode::TimeAdvanceRequestAvailable | AdvanceMode::NextMessageRequestAvailable
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RegulationTrack<T: LogicalTime> {
    Disabled,
    /// Requested; waiting for the federation to acknowledge the contribution.
    EnablingPending { lookahead: T::Interval },
    Enabled,
}

impl<T: LogicalTime> RegulationTrack<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, RegulationTrack::Enabled)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RegulationTrack::EnablingPending { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstrainedTrack {
    Disabled,
    Enabled,
}

impl ConstrainedTrack {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ConstrainedTrack::Enabled)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AdvanceTrack<T: LogicalTime> {
    Idle,
    Pending { mode: AdvanceMode, target: T },
}

impl<T: LogicalTime> AdvanceTrack<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, AdvanceTrack::Pending { .. })
    }
}

/// The three tracks of one federate.
#[derive(Debug, Clone)]
pub struct Timeline<T: LogicalTime> {
    pub regulation: RegulationTrack<T>,
    pub constrained: ConstrainedTrack,
    pub advance: AdvanceTrack<T>,
}

impl<T: LogicalTime> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            regulation: RegulationTrack::Disabled,
            constrained: ConstrainedTrack::Disabled,
            advance: AdvanceTrack::Idle,
        }
    }
}

impl<T: LogicalTime> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }
}
