//! Core types for the Cadence RTI: the logical-time algebra shared by every
//! other crate, and the generational handle arenas that federation state is
//! kept in.
#![deny(clippy::all)]

pub mod handle;
pub mod keys;
pub mod time;

pub use handle::{Handle, HandleArena};
pub use keys::*;
pub use time::{
    HlaFloat64Interval, HlaFloat64Time, HlaInteger64Interval, HlaInteger64Time, LogicalTime,
    Openness, TimeBytes, TimeError, TimeKind, TimePosition,
};
