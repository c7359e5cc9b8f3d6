//! The logical-time algebra: a totally ordered scalar time with a zero and a
//! positive-minimum interval, saturating arithmetic and a little-endian wire
//! codec.
//!
//! The open/closed refinement ([`TimePosition`]) is deliberately kept outside
//! the algebra itself; queue and LBTS ordering compose a time with an
//! [`Openness`] flag separately, which keeps the integer and float
//! implementations interchangeable.

use serde::{Deserialize, Serialize};

/// Failures of the time algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// Subtraction with a minuend smaller than the subtrahend.
    #[error("illegal time arithmetic")]
    IllegalTimeArithmetic,

    /// Byte string of the wrong length or encoding an inadmissible value.
    #[error("could not decode logical time")]
    CouldNotDecode,
}

/// The two supported logical-time representations, named the way the
/// standard's time factories name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeKind {
    HlaInteger64Time,
    HlaFloat64Time,
}

impl TimeKind {
    /// Resolve a logical-time factory name. Unknown names yield `None`, which
    /// callers surface as `CouldNotCreateLogicalTimeFactory`.
    pub fn from_factory_name(name: &str) -> Option<Self> {
        match name {
            "HLAinteger64Time" => Some(Self::HlaInteger64Time),
            "HLAfloat64Time" => Some(Self::HlaFloat64Time),
            _ => None,
        }
    }

    pub fn factory_name(&self) -> &'static str {
        match self {
            Self::HlaInteger64Time => "HLAinteger64Time",
            Self::HlaFloat64Time => "HLAfloat64Time",
        }
    }
}

impl std::fmt::Display for TimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.factory_name())
    }
}

/// A totally ordered logical time scalar with its interval type.
///
/// Contract: `t.add(ZERO) == t`, `t.add(EPSILON) > t` for `t < FINAL`,
/// addition saturates at [`Self::FINAL`], and `decode(encode(t)) == t`.
pub trait LogicalTime:
    Copy
    + std::fmt::Debug
    + std::fmt::Display
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + std::hash::Hash
    + Send
    + Sync
    + 'static
{
    /// The difference type of the algebra (lookaheads are intervals).
    type Interval: Copy
        + std::fmt::Debug
        + std::fmt::Display
        + PartialEq
        + Eq
        + PartialOrd
        + Ord
        + std::hash::Hash
        + Send
        + Sync
        + 'static;

    const KIND: TimeKind;
    const INITIAL: Self;
    const FINAL: Self;
    const ZERO: Self::Interval;
    const EPSILON: Self::Interval;
    const ENCODED_LENGTH: usize = 8;

    /// Saturating addition; `FINAL` is absorbing.
    fn add(self, interval: Self::Interval) -> Self;

    /// Saturating interval addition.
    fn sum_intervals(a: Self::Interval, b: Self::Interval) -> Self::Interval;

    /// `self - earlier`, defined when `self >= earlier`.
    fn difference(self, earlier: Self) -> Result<Self::Interval, TimeError>;

    /// True for values a federate may legally pass through the API.
    fn is_admissible(&self) -> bool {
        Self::INITIAL <= *self && *self <= Self::FINAL
    }

    /// True for intervals admissible as lookaheads.
    fn interval_is_admissible(interval: &Self::Interval) -> bool {
        *interval >= Self::ZERO
    }

    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, TimeError>;
    fn encode_interval(interval: Self::Interval) -> Vec<u8>;
    fn decode_interval(bytes: &[u8]) -> Result<Self::Interval, TimeError>;
}

// --- 64-bit signed integer semantics ---

/// Logical time with 64-bit signed integer semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HlaInteger64Time(i64);

/// Interval companion of [`HlaInteger64Time`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HlaInteger64Interval(i64);

impl HlaInteger64Time {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl HlaInteger64Interval {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for HlaInteger64Time {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<i64> for HlaInteger64Interval {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for HlaInteger64Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for HlaInteger64Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl LogicalTime for HlaInteger64Time {
    type Interval = HlaInteger64Interval;

    const KIND: TimeKind = TimeKind::HlaInteger64Time;
    const INITIAL: Self = Self(0);
    const FINAL: Self = Self(i64::MAX);
    const ZERO: Self::Interval = HlaInteger64Interval(0);
    const EPSILON: Self::Interval = HlaInteger64Interval(1);

    fn add(self, interval: Self::Interval) -> Self {
        Self(self.0.saturating_add(interval.0).min(Self::FINAL.0))
    }

    fn sum_intervals(a: Self::Interval, b: Self::Interval) -> Self::Interval {
        HlaInteger64Interval(a.0.saturating_add(b.0))
    }

    fn difference(self, earlier: Self) -> Result<Self::Interval, TimeError> {
        if self < earlier {
            return Err(TimeError::IllegalTimeArithmetic);
        }
        self.0
            .checked_sub(earlier.0)
            .map(HlaInteger64Interval)
            .ok_or(TimeError::IllegalTimeArithmetic)
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, TimeError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| TimeError::CouldNotDecode)?;
        Ok(Self(i64::from_le_bytes(raw)))
    }

    fn encode_interval(interval: Self::Interval) -> Vec<u8> {
        interval.0.to_le_bytes().to_vec()
    }

    fn decode_interval(bytes: &[u8]) -> Result<Self::Interval, TimeError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| TimeError::CouldNotDecode)?;
        Ok(HlaInteger64Interval(i64::from_le_bytes(raw)))
    }
}

// --- IEEE-754 double semantics ---

/// Logical time with IEEE-754 double semantics. NaN is inadmissible; the
/// total order is `f64::total_cmp`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(transparent)]
pub struct HlaFloat64Time(f64);

/// Interval companion of [`HlaFloat64Time`].
#[derive(Debug, Clone, Copy, Default)]
#[repr(transparent)]
pub struct HlaFloat64Interval(f64);

/// Smallest representable step above `value`. Keeps `t + EPSILON > t` true
/// even where adding `f64::MIN_POSITIVE` would be lost to rounding.
fn next_up(value: f64) -> f64 {
    if value.is_nan() || value == f64::INFINITY {
        return value;
    }
    let bits = if value == 0.0 {
        1
    } else if value.is_sign_positive() {
        value.to_bits() + 1
    } else {
        value.to_bits() - 1
    };
    f64::from_bits(bits)
}

/// Folds `-0.0` onto `+0.0` so `Eq`/`Hash` by bit pattern stay consistent.
fn normalize(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

macro_rules! float_newtype_ord {
    ($name:ident) => {
        impl $name {
            pub fn new(value: f64) -> Self {
                Self(normalize(value))
            }

            pub fn value(&self) -> f64 {
                self.0
            }
        }

        impl From<f64> for $name {
            fn from(value: f64) -> Self {
                Self::new(value)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
            }
        }

        impl Eq for $name {}

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.0.total_cmp(&other.0)
            }
        }

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.0.to_bits().hash(state);
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

float_newtype_ord!(HlaFloat64Time);
float_newtype_ord!(HlaFloat64Interval);

impl LogicalTime for HlaFloat64Time {
    type Interval = HlaFloat64Interval;

    const KIND: TimeKind = TimeKind::HlaFloat64Time;
    const INITIAL: Self = Self(0.0);
    const FINAL: Self = Self(f64::MAX);
    const ZERO: Self::Interval = HlaFloat64Interval(0.0);
    const EPSILON: Self::Interval = HlaFloat64Interval(f64::MIN_POSITIVE);

    fn add(self, interval: Self::Interval) -> Self {
        if self >= Self::FINAL {
            return Self::FINAL;
        }
        let sum = self.0 + interval.0;
        if sum >= f64::MAX {
            return Self::FINAL;
        }
        // A positive interval must make progress; bump to the next
        // representable value when the addition was absorbed by rounding.
        if interval > Self::ZERO && sum <= self.0 {
            Self::new(next_up(self.0))
        } else {
            Self::new(sum)
        }
    }

    fn sum_intervals(a: Self::Interval, b: Self::Interval) -> Self::Interval {
        let sum = a.0 + b.0;
        if sum >= f64::MAX {
            HlaFloat64Interval(f64::MAX)
        } else {
            HlaFloat64Interval::new(sum)
        }
    }

    fn difference(self, earlier: Self) -> Result<Self::Interval, TimeError> {
        if self < earlier {
            return Err(TimeError::IllegalTimeArithmetic);
        }
        Ok(HlaFloat64Interval::new(self.0 - earlier.0))
    }

    fn is_admissible(&self) -> bool {
        !self.0.is_nan() && Self::INITIAL <= *self && *self <= Self::FINAL
    }

    fn interval_is_admissible(interval: &Self::Interval) -> bool {
        !interval.0.is_nan() && *interval >= Self::ZERO
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, TimeError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| TimeError::CouldNotDecode)?;
        let value = f64::from_le_bytes(raw);
        if value.is_nan() {
            return Err(TimeError::CouldNotDecode);
        }
        Ok(Self::new(value))
    }

    fn encode_interval(interval: Self::Interval) -> Vec<u8> {
        interval.0.to_le_bytes().to_vec()
    }

    fn decode_interval(bytes: &[u8]) -> Result<Self::Interval, TimeError> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| TimeError::CouldNotDecode)?;
        let value = f64::from_le_bytes(raw);
        if value.is_nan() {
            return Err(TimeError::CouldNotDecode);
        }
        Ok(HlaFloat64Interval::new(value))
    }
}

// --- positions ---

/// Whether the exact instant of a position is still reachable.
///
/// `Closed` means "the exact instant is still available"; `Open` means
/// "strictly greater than the instant". `Closed` orders before `Open` at
/// equal times, which the derived `Ord` below relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Openness {
    #[default]
    Closed,
    Open,
}

/// A timestamped position `(t, openness)`: the refinement that distinguishes
/// "may still happen exactly at `t`" from "strictly after `t`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePosition<Tm> {
    pub time: Tm,
    pub openness: Openness,
}

impl<Tm> TimePosition<Tm> {
    pub fn closed(time: Tm) -> Self {
        Self {
            time,
            openness: Openness::Closed,
        }
    }

    pub fn open(time: Tm) -> Self {
        Self {
            time,
            openness: Openness::Open,
        }
    }

    pub fn map_time<U>(self, f: impl FnOnce(Tm) -> U) -> TimePosition<U> {
        TimePosition {
            time: f(self.time),
            openness: self.openness,
        }
    }
}

impl<T: LogicalTime> TimePosition<T> {
    /// The LBTS of an empty set of regulating federates.
    pub fn unbounded() -> Self {
        Self::open(T::FINAL)
    }
}

impl<Tm: std::fmt::Display> std::fmt::Display for TimePosition<Tm> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.openness {
            Openness::Closed => write!(f, "[{}]", self.time),
            Openness::Open => write!(f, "({}+", self.time),
        }
    }
}

// --- erased wire form ---

/// A logical time (or interval) as its wire encoding: the little-endian
/// fixed-width byte string of the algebra's codec. The wire stays agnostic of
/// the time kind; endpoints decode with the kind their federation uses.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBytes(pub Vec<u8>);

impl TimeBytes {
    pub fn of<T: LogicalTime>(time: T) -> Self {
        Self(time.encode())
    }

    pub fn of_interval<T: LogicalTime>(interval: T::Interval) -> Self {
        Self(T::encode_interval(interval))
    }

    pub fn to_time<T: LogicalTime>(&self) -> Result<T, TimeError> {
        T::decode(&self.0)
    }

    pub fn to_interval<T: LogicalTime>(&self) -> Result<T::Interval, TimeError> {
        T::decode_interval(&self.0)
    }
}

impl std::fmt::Debug for TimeBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeBytes(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
