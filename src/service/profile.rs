//! Persisted player profiles and the stores that hold them.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::LoginStatus;
use crate::protocol::outgoing::Item;
use crate::update::Position;

/// Skills tracked by the legacy client.
pub const SKILL_COUNT: usize = 21;
const HITPOINTS: usize = 3;
const HITPOINTS_START_EXPERIENCE: u32 = 1154;

/// Where new profiles start.
pub const SPAWN: Position = Position::new(3222, 3218, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub experience: u32,
    pub level: u8,
}

/// An effect that outlives the session, resumed on the next login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEffect {
    /// Client config variable that displays the effect
    pub config_id: u16,
    pub value: u8,
    pub remaining_ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Normalised username
    pub username: String,
    pub password: String,
    pub rights: u8,
    pub member: bool,
    pub disabled: bool,
    pub position: Position,
    pub run_energy: u8,
    pub inventory: Vec<Item>,
    pub equipment: Vec<Item>,
    pub skills: Vec<Skill>,
    pub timed_effects: Vec<TimedEffect>,
}

impl Profile {
    /// Fresh profile at the spawn point.
    pub fn new(username: &str, password: &str) -> Self {
        let mut skills = vec![
            Skill {
                experience: 0,
                level: 1
            };
            SKILL_COUNT
        ];
        skills[HITPOINTS] = Skill {
            experience: HITPOINTS_START_EXPERIENCE,
            level: 10,
        };
        Self {
            username: username.to_string(),
            password: password.to_string(),
            rights: 0,
            member: false,
            disabled: false,
            position: SPAWN,
            run_energy: 100,
            inventory: Vec::new(),
            equipment: Vec::new(),
            skills,
            timed_effects: Vec::new(),
        }
    }
}

/// Why a profile could not be loaded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("no profile stored under that name")]
    NotFound,
    #[error("profile is disabled")]
    Disabled,
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

impl LoadFailure {
    /// Login status reported to the client.
    pub fn status(&self) -> LoginStatus {
        match self {
            LoadFailure::NotFound => LoginStatus::InvalidCredentials,
            LoadFailure::Disabled => LoginStatus::AccountDisabled,
            LoadFailure::Unavailable(_) => LoginStatus::CouldNotComplete,
        }
    }
}

/// Storage for player profiles. Calls may block; they run on the worker pool.
pub trait ProfileStore: Send + Sync {
    fn load(&self, username: &str) -> std::result::Result<Profile, LoadFailure>;

    fn save(&self, profile: &Profile) -> Result<()>;
}

/// Hosts refused at login.
pub trait BanList: Send + Sync {
    fn is_banned(&self, host: IpAddr) -> bool;
}

/// In-process profile store.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) -> Result<()> {
        self.save(&profile)
    }

    pub fn len(&self) -> usize {
        self.profiles.read().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load(&self, username: &str) -> std::result::Result<Profile, LoadFailure> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| LoadFailure::Unavailable(constants::ERR_LOCK_POISONED.into()))?;
        profiles.get(username).cloned().ok_or(LoadFailure::NotFound)
    }

    fn save(&self, profile: &Profile) -> Result<()> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?;
        profiles.insert(profile.username.clone(), profile.clone());
        Ok(())
    }
}

/// Fixed ban list, typically built from configuration.
#[derive(Debug, Default, Clone)]
pub struct MemoryBanList {
    hosts: Vec<IpAddr>,
}

impl MemoryBanList {
    pub fn new(hosts: Vec<IpAddr>) -> Self {
        Self { hosts }
    }
}

impl BanList for MemoryBanList {
    fn is_banned(&self, host: IpAddr) -> bool {
        self.hosts.contains(&host)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_profile_defaults() {
        let profile = Profile::new("zezima", "pw");
        assert_eq!(profile.skills.len(), SKILL_COUNT);
        assert_eq!(profile.skills[HITPOINTS].level, 10);
        assert_eq!(profile.position, SPAWN);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryProfileStore::new();
        assert_eq!(store.load("nobody"), Err(LoadFailure::NotFound));

        let mut profile = Profile::new("zezima", "pw");
        profile.run_energy = 42;
        store.save(&profile).unwrap();
        assert_eq!(store.load("zezima").unwrap().run_energy, 42);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failure_statuses() {
        assert_eq!(LoadFailure::Disabled.status(), LoginStatus::AccountDisabled);
        assert_eq!(
            LoadFailure::Unavailable("down".into()).status(),
            LoginStatus::CouldNotComplete
        );
    }

    #[test]
    fn test_profile_serializes_to_toml() {
        let profile = Profile::new("zezima", "pw");
        let encoded = toml::to_string(&profile).unwrap();
        let decoded: Profile = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, profile);
    }
}
