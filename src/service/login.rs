//! Login verdicts.
//!
//! The checks run in a fixed order and the first failure decides the status
//! code the client sees:
//!
//! 1. the echoed server key must match the one this session issued
//! 2. the credentials must be well formed
//! 3. the name must not already be online
//! 4. the profile must load, match the password and not be disabled
//! 5. the population must have room
//! 6. the host must not be banned
//!
//! Evaluation may block on the profile store, so the reactor runs it on the
//! worker pool.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::core::text::encode_name;
use crate::protocol::handshake::{
    is_valid_password, is_valid_username, normalize_username, LoginRequest, LoginStatus,
};

use super::population::{Population, PopulationSlot};
use super::profile::{BanList, LoadFailure, Profile, ProfileStore};

/// Outcome of a login attempt.
#[derive(Debug)]
pub struct Verdict {
    pub status: LoginStatus,
    pub rights: u8,
    /// Present exactly when `status` is `Ok`
    pub admitted: Option<Admitted>,
}

impl Verdict {
    fn refuse(status: LoginStatus) -> Self {
        debug!(?status, "Login refused");
        Self {
            status,
            rights: 0,
            admitted: None,
        }
    }
}

/// What a successful login hands to the session.
#[derive(Debug)]
pub struct Admitted {
    pub profile: Profile,
    pub slot: PopulationSlot,
}

pub struct Authenticator {
    profiles: Arc<dyn ProfileStore>,
    bans: Arc<dyn BanList>,
    population: Arc<Population>,
    auto_register: bool,
}

impl Authenticator {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        bans: Arc<dyn BanList>,
        population: Arc<Population>,
        auto_register: bool,
    ) -> Self {
        Self {
            profiles,
            bans,
            population,
            auto_register,
        }
    }

    pub fn population(&self) -> &Arc<Population> {
        &self.population
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    #[instrument(level = "debug", skip(self, request), fields(user = %request.username))]
    pub fn evaluate(&self, host: IpAddr, request: &LoginRequest, issued_server_key: u64) -> Verdict {
        if request.server_key != issued_server_key {
            return Verdict::refuse(LoginStatus::BadSessionId);
        }

        let username = normalize_username(&request.username);
        if !is_valid_username(&username) || !is_valid_password(&request.password) {
            return Verdict::refuse(LoginStatus::InvalidCredentials);
        }

        let name_hash = encode_name(&username);
        if self.population.is_online(name_hash) {
            return Verdict::refuse(LoginStatus::AlreadyOnline);
        }

        let profile = match self.profiles.load(&username) {
            Ok(profile) => profile,
            Err(LoadFailure::NotFound) if self.auto_register => {
                debug!("Registering new profile");
                Profile::new(&username, &request.password)
            }
            Err(failure) => return Verdict::refuse(failure.status()),
        };
        if profile.password != request.password {
            return Verdict::refuse(LoginStatus::InvalidCredentials);
        }
        if profile.disabled {
            return Verdict::refuse(LoginStatus::AccountDisabled);
        }

        let slot = match self.population.reserve(name_hash) {
            Ok(slot) => slot,
            Err(e) => return Verdict::refuse(e.status()),
        };

        // The slot is released when the refused verdict drops it.
        if self.bans.is_banned(host) {
            return Verdict::refuse(LoginStatus::AccountDisabled);
        }

        Verdict {
            status: LoginStatus::Ok,
            rights: profile.rights,
            admitted: Some(Admitted { profile, slot }),
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("population", &self.population.len())
            .field("auto_register", &self.auto_register)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::handshake::LoginVariant;
    use crate::service::profile::{MemoryBanList, MemoryProfileStore};
    use std::net::Ipv4Addr;

    const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4));
    const SERVER_KEY: u64 = 0x1122_3344_5566_7788;

    fn request(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            variant: LoginVariant::Fresh,
            client_version: 317,
            low_memory: false,
            uid: 0,
            client_key: 1,
            server_key: SERVER_KEY,
            username: username.into(),
            password: password.into(),
        }
    }

    fn authenticator(capacity: u16, auto_register: bool, bans: Vec<IpAddr>) -> Authenticator {
        Authenticator::new(
            Arc::new(MemoryProfileStore::new()),
            Arc::new(MemoryBanList::new(bans)),
            Arc::new(Population::new(capacity)),
            auto_register,
        )
    }

    #[test]
    fn test_auto_register_admits() {
        let auth = authenticator(10, true, vec![]);
        let verdict = auth.evaluate(HOST, &request("Zezima", "hunter2"), SERVER_KEY);
        assert_eq!(verdict.status, LoginStatus::Ok);
        let admitted = verdict.admitted.unwrap();
        assert_eq!(admitted.profile.username, "zezima");
        assert_eq!(admitted.slot.index(), 1);
    }

    #[test]
    fn test_stale_server_key() {
        let auth = authenticator(10, true, vec![]);
        let verdict = auth.evaluate(HOST, &request("zezima", "pw"), SERVER_KEY + 1);
        assert_eq!(verdict.status, LoginStatus::BadSessionId);
    }

    #[test]
    fn test_unknown_user_without_registration() {
        let auth = authenticator(10, false, vec![]);
        let verdict = auth.evaluate(HOST, &request("zezima", "pw"), SERVER_KEY);
        assert_eq!(verdict.status, LoginStatus::InvalidCredentials);
    }

    #[test]
    fn test_wrong_password_and_disabled() {
        let store = Arc::new(MemoryProfileStore::new());
        store.insert(Profile::new("zezima", "right")).unwrap();
        let mut banned = Profile::new("durial", "pw");
        banned.disabled = true;
        store.insert(banned).unwrap();
        let auth = Authenticator::new(
            store,
            Arc::new(MemoryBanList::default()),
            Arc::new(Population::new(10)),
            false,
        );

        let verdict = auth.evaluate(HOST, &request("zezima", "wrong"), SERVER_KEY);
        assert_eq!(verdict.status, LoginStatus::InvalidCredentials);
        let verdict = auth.evaluate(HOST, &request("durial", "pw"), SERVER_KEY);
        assert_eq!(verdict.status, LoginStatus::AccountDisabled);
    }

    #[test]
    fn test_duplicate_login() {
        let auth = authenticator(10, true, vec![]);
        let first = auth.evaluate(HOST, &request("zezima", "pw"), SERVER_KEY);
        assert!(first.status.is_ok());
        let second = auth.evaluate(HOST, &request("ZEZIMA", "pw"), SERVER_KEY);
        assert_eq!(second.status, LoginStatus::AlreadyOnline);
    }

    #[test]
    fn test_world_full() {
        let auth = authenticator(1, true, vec![]);
        let _first = auth.evaluate(HOST, &request("zezima", "pw"), SERVER_KEY);
        let second = auth.evaluate(HOST, &request("durial", "pw"), SERVER_KEY);
        assert_eq!(second.status, LoginStatus::WorldFull);
    }

    #[test]
    fn test_banned_host_frees_slot() {
        let auth = authenticator(1, true, vec![HOST]);
        let verdict = auth.evaluate(HOST, &request("zezima", "pw"), SERVER_KEY);
        assert_eq!(verdict.status, LoginStatus::AccountDisabled);
        assert!(auth.population().is_empty());
    }

    #[test]
    fn test_malformed_credentials() {
        let auth = authenticator(10, true, vec![]);
        for (user, pass) in [("", "pw"), ("a  b", "pw"), ("thirteenchars", "pw"), ("ok", "")] {
            let verdict = auth.evaluate(HOST, &request(user, pass), SERVER_KEY);
            assert_eq!(verdict.status, LoginStatus::InvalidCredentials, "{user:?}");
        }
    }
}
