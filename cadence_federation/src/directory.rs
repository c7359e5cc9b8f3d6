//! The federate directory: the set of currently joined federates with their
//! per-federate time-management state.
//!
//! The server owns the authoritative copy and mints handles; every federate
//! keeps a replica that it updates from the server's directory-change
//! broadcasts. LBTS is a pure fold over this structure (see `lbts`).

use std::collections::BTreeMap;

use cadence_core::{
    handle::{Handle, RawHandle},
    FederateHandle, LogicalTime, TimeBytes, TimePosition,
};

use crate::{
    error::FedError,
    proto::{FederateInfo, FederateStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Resigning,
    Gone,
}

#[derive(Debug, Clone)]
pub struct FederateRecord<T: LogicalTime> {
    pub name: String,
    pub federate_type: String,
    pub regulating: bool,
    pub constrained: bool,
    /// The federate's own current logical time. Never decreases.
    pub committed: T,
    pub lookahead: Option<T::Interval>,
    /// The federate's LBTS contribution; `Some` iff regulating.
    pub bound: Option<TimePosition<T>>,
    pub liveness: Liveness,
}

impl<T: LogicalTime> FederateRecord<T> {
    pub fn new(name: String, federate_type: String) -> Self {
        Self {
            name,
            federate_type,
            regulating: false,
            constrained: false,
            committed: T::INITIAL,
            lookahead: None,
            bound: None,
            liveness: Liveness::Alive,
        }
    }

    pub fn status(&self) -> FederateStatus {
        FederateStatus {
            regulating: self.regulating,
            constrained: self.constrained,
            committed: TimeBytes::of(self.committed),
            lookahead: self.lookahead.map(TimeBytes::of_interval::<T>),
            bound: self.bound.map(|b| b.map_time(TimeBytes::of)),
        }
    }

    /// Apply a replicated status, honoring the monotonicity of `committed`
    /// and of a live `bound`.
    pub fn apply_status(&mut self, status: &FederateStatus) -> Result<(), FedError> {
        let committed: T = status.committed.to_time()?;
        let lookahead = status
            .lookahead
            .as_ref()
            .map(|d| d.to_interval::<T>())
            .transpose()?;
        let bound = match &status.bound {
            Some(b) => Some(TimePosition {
                time: b.time.to_time::<T>()?,
                openness: b.openness,
            }),
            None => None,
        };

        self.regulating = status.regulating;
        self.constrained = status.constrained;
        self.committed = self.committed.max(committed);
        self.lookahead = lookahead;
        self.bound = match (self.regulating, self.bound, bound) {
            (false, _, _) => None,
            (true, Some(old), Some(new)) => Some(old.max(new)),
            (true, _, new) => new,
        };
        Ok(())
    }
}

impl<T: LogicalTime> TryFrom<&FederateInfo> for FederateRecord<T> {
    type Error = FedError;

    fn try_from(info: &FederateInfo) -> Result<Self, FedError> {
        let mut record = FederateRecord::new(info.name.clone(), info.federate_type.clone());
        record.apply_status(&info.status)?;
        Ok(record)
    }
}

#[derive(Debug, Clone)]
pub struct Directory<T: LogicalTime> {
    federates: BTreeMap<FederateHandle, FederateRecord<T>>,
    next_index: u32,
}

impl<T: LogicalTime> Default for Directory<T> {
    fn default() -> Self {
        Self {
            federates: BTreeMap::new(),
            next_index: 0,
        }
    }
}

impl<T: LogicalTime> Directory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new federate (authoritative side). Fails if `name` duplicates
    /// a live federate.
    pub fn admit(&mut self, record: FederateRecord<T>) -> Result<FederateHandle, FedError> {
        if self
            .federates
            .values()
            .any(|f| f.liveness == Liveness::Alive && f.name == record.name)
        {
            return Err(FedError::NameAlreadyInUse(record.name));
        }
        let handle = FederateHandle::from_raw(RawHandle {
            index: self.next_index,
            generation: 0,
        });
        self.next_index += 1;
        self.federates.insert(handle, record);
        Ok(handle)
    }

    /// Install a record under a server-assigned handle (replica side).
    pub fn install(&mut self, handle: FederateHandle, record: FederateRecord<T>) {
        self.federates.insert(handle, record);
    }

    pub fn remove(&mut self, handle: FederateHandle) -> Option<FederateRecord<T>> {
        self.federates.remove(&handle)
    }

    pub fn get(&self, handle: FederateHandle) -> Option<&FederateRecord<T>> {
        self.federates.get(&handle)
    }

    pub fn get_mut(&mut self, handle: FederateHandle) -> Option<&mut FederateRecord<T>> {
        self.federates.get_mut(&handle)
    }

    pub fn contains(&self, handle: FederateHandle) -> bool {
        self.federates.contains_key(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FederateHandle, &FederateRecord<T>)> {
        self.federates.iter().map(|(h, r)| (*h, r))
    }

    pub fn alive(&self) -> impl Iterator<Item = (FederateHandle, &FederateRecord<T>)> {
        self.iter().filter(|(_, r)| r.liveness == Liveness::Alive)
    }

    pub fn len(&self) -> usize {
        self.federates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.federates.is_empty()
    }

    /// The LBTS seen by `observer`: the minimum contribution over all other
    /// alive regulating federates, or `(FINAL, open)` for the empty set.
    pub fn lbts_excluding(&self, observer: FederateHandle) -> TimePosition<T> {
        self.alive()
            .filter(|(h, _)| *h != observer)
            .filter_map(|(_, r)| r.bound)
            .min()
            .unwrap_or_else(TimePosition::unbounded)
    }

    /// Whether any other alive federate currently contributes to LBTS.
    pub fn has_contributors_excluding(&self, observer: FederateHandle) -> bool {
        self.alive()
            .any(|(h, r)| h != observer && r.bound.is_some())
    }
}
