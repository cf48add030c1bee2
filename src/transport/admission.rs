//! Per-host admission control.
//!
//! Every accepted socket passes through the gate before any byte is read.
//! A host is refused while it already holds `max_per_host` connections, or
//! while it reconnects inside the throttle window with `per_interval_cap`
//! connections still open. A refused socket is closed without a handshake.
//!
//! Admission is represented by an [`AdmissionPermit`]; dropping the permit
//! gives the slot back, so the tally cannot leak on early returns.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::AdmissionConfig;

#[derive(Debug, Clone, Copy)]
struct AdmissionRecord {
    tally: u32,
    last_connect: Instant,
}

/// Shared connection tally, keyed by peer address.
#[derive(Debug)]
pub struct AdmissionGate {
    records: Mutex<HashMap<IpAddr, AdmissionRecord>>,
    limits: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new(limits: AdmissionConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            limits,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<IpAddr, AdmissionRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| {
            warn!("Admission table lock poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    fn is_exempt(&self, host: IpAddr) -> bool {
        self.limits.exempt_loopback && host.is_loopback()
    }

    /// Try to admit a connection from `host`.
    pub fn enter(&self, host: IpAddr) -> bool {
        self.enter_at(host, Instant::now())
    }

    /// [`AdmissionGate::enter`] with an explicit clock reading.
    pub fn enter_at(&self, host: IpAddr, now: Instant) -> bool {
        if self.is_exempt(host) {
            return true;
        }

        let mut records = self.records();
        let record = records.entry(host).or_insert(AdmissionRecord {
            tally: 0,
            last_connect: now,
        });

        let throttled = record.tally > 0
            && now.saturating_duration_since(record.last_connect) < self.limits.throttle_window
            && record.tally >= self.limits.per_interval_cap;

        if record.tally >= self.limits.max_per_host || throttled {
            debug!(%host, tally = record.tally, throttled, "Admission refused");
            if record.tally == 0 {
                records.remove(&host);
            }
            return false;
        }

        record.tally += 1;
        record.last_connect = now;
        true
    }

    /// Release one admission held by `host`. Never drops below zero.
    pub fn exit(&self, host: IpAddr) {
        let mut records = self.records();
        if let Some(record) = records.get_mut(&host) {
            record.tally = record.tally.saturating_sub(1);
            if record.tally == 0 {
                records.remove(&host);
            }
        }
    }

    /// Open connections currently counted for `host`.
    pub fn tally(&self, host: IpAddr) -> u32 {
        self.records().get(&host).map_or(0, |r| r.tally)
    }

    /// Hosts with at least one counted connection.
    pub fn tracked_hosts(&self) -> usize {
        self.records().len()
    }

    /// Admit `host` and wrap the slot in a permit.
    pub fn admit(self: &Arc<Self>, host: IpAddr) -> Option<AdmissionPermit> {
        self.enter(host).then(|| AdmissionPermit {
            gate: Arc::clone(self),
            host,
        })
    }
}

/// Proof of admission; releases the host's slot when dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
    host: IpAddr,
}

impl AdmissionPermit {
    pub fn host(&self) -> IpAddr {
        self.host
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.exit(self.host);
    }
}
