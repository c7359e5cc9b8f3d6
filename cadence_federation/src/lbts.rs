//! The outbound-bound calculus behind the LBTS computation.
//!
//! A regulating federate's LBTS contribution is a [`TimePosition`]: the
//! earliest position any message it may still send can carry. The fold over
//! all contributions lives on the directory
//! ([`crate::directory::Directory::lbts_excluding`]); this module computes
//! the individual contributions.
//!
//! Zero lookahead is the openness pivot (IEEE 1516): with positive lookahead
//! a send exactly at `committed + lookahead` is permitted (closed); with zero
//! lookahead sends must be strictly later than the committed time (open),
//! except under the *available* advance flavors, which permit a send exactly
//! at the granted time (closed).

use cadence_core::{LogicalTime, TimePosition};

use crate::timeline::AdvanceMode;

/// Contribution of a regulating federate with no advance in flight.
pub fn idle_bound<T: LogicalTime>(committed: T, lookahead: T::Interval) -> TimePosition<T> {
    if lookahead > T::ZERO {
        TimePosition::closed(committed.add(lookahead))
    } else {
        TimePosition::open(committed)
    }
}

/// Contribution while an advance is pending, from the earliest time the
/// advance could still be granted at (`floor`): the request target for
/// TAR/TARA, the conditional grant candidate for NMR/NMRA/FQR.
pub fn advance_bound<T: LogicalTime>(
    mode: AdvanceMode,
    floor: T,
    lookahead: T::Interval,
) -> TimePosition<T> {
    if lookahead > T::ZERO {
        return TimePosition::closed(floor.add(lookahead));
    }
    match mode {
        // After a grant at `floor` the federate sends strictly later.
        AdvanceMode::TimeAdvanceRequest
        | AdvanceMode::NextMessageRequest
        | AdvanceMode::FlushQueueRequest => TimePosition::open(floor),
        // The available flavors may send exactly at the granted time.
        AdvanceMode::TimeAdvanceRequestAvailable | AdvanceMode::NextMessageRequestAvailable => {
            TimePosition::closed(floor)
        }
    }
}

/// The earliest time an NMR/NMRA grant could still happen at: the request
/// target, capped by the earliest undelivered TSO message and by the LBTS the
/// federate itself observes. Re-evaluated (and thereby monotonically raised)
/// whenever either input changes; this is what turns the mutual-wait of two
/// NMR federates into a convergent fixed-point climb instead of a deadlock.
pub fn next_message_floor<T: LogicalTime>(
    target: T,
    earliest_queued: Option<T>,
    observed_lbts: TimePosition<T>,
) -> T {
    let mut floor = target;
    if let Some(earliest) = earliest_queued {
        floor = floor.min(earliest);
    }
    floor.min(observed_lbts.time)
}
