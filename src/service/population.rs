//! Online player registry.
//!
//! Slots run from 1 to the configured capacity; slot 0 is never handed out
//! because the client treats it as "no player". A name can hold at most one
//! slot at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::warn;

use crate::protocol::handshake::LoginStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("no free slot")]
    Full,
    #[error("name already online")]
    AlreadyOnline,
}

impl ReserveError {
    pub fn status(self) -> LoginStatus {
        match self {
            ReserveError::Full => LoginStatus::WorldFull,
            ReserveError::AlreadyOnline => LoginStatus::AlreadyOnline,
        }
    }
}

#[derive(Debug, Default)]
struct Occupancy {
    /// Name hash per slot, indexed by `slot - 1`
    slots: Vec<Option<u64>>,
    by_name: HashMap<u64, u16>,
}

#[derive(Debug)]
pub struct Population {
    occupancy: Mutex<Occupancy>,
}

impl Population {
    pub fn new(capacity: u16) -> Self {
        Self {
            occupancy: Mutex::new(Occupancy {
                slots: vec![None; capacity as usize],
                by_name: HashMap::new(),
            }),
        }
    }

    fn occupancy(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy.lock().unwrap_or_else(|poisoned| {
            warn!("Population lock poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    pub fn capacity(&self) -> usize {
        self.occupancy().slots.len()
    }

    pub fn len(&self) -> usize {
        self.occupancy().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_online(&self, name_hash: u64) -> bool {
        self.occupancy().by_name.contains_key(&name_hash)
    }

    /// Slot held by `name_hash`, if online.
    pub fn slot_of(&self, name_hash: u64) -> Option<u16> {
        self.occupancy().by_name.get(&name_hash).copied()
    }

    /// Claim the lowest free slot for `name_hash`.
    pub fn reserve(self: &Arc<Self>, name_hash: u64) -> Result<PopulationSlot, ReserveError> {
        let mut occupancy = self.occupancy();
        if occupancy.by_name.contains_key(&name_hash) {
            return Err(ReserveError::AlreadyOnline);
        }
        let index = occupancy
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ReserveError::Full)?;
        occupancy.slots[index] = Some(name_hash);
        let slot = (index + 1) as u16;
        occupancy.by_name.insert(name_hash, slot);

        Ok(PopulationSlot {
            population: Arc::clone(self),
            slot,
            name_hash,
        })
    }

    fn release(&self, slot: u16, name_hash: u64) {
        let mut occupancy = self.occupancy();
        if let Some(entry) = occupancy.slots.get_mut(slot as usize - 1) {
            if *entry == Some(name_hash) {
                *entry = None;
                occupancy.by_name.remove(&name_hash);
            }
        }
    }
}

/// A held population slot. Dropping it frees the slot and the name.
#[derive(Debug)]
pub struct PopulationSlot {
    population: Arc<Population>,
    slot: u16,
    name_hash: u64,
}

impl PopulationSlot {
    pub fn index(&self) -> u16 {
        self.slot
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }
}

impl Drop for PopulationSlot {
    fn drop(&mut self) {
        self.population.release(self.slot, self.name_hash);
    }
}
