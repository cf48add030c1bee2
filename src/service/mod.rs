//! # Session Collaborators
//!
//! Everything a session consults once the wire protocol is satisfied.
//!
//! ## Components
//! - **Profile**: persisted player state and the [`ProfileStore`] / [`BanList`] seams
//! - **Population**: slot registry with one slot per online name
//! - **Login**: the [`Authenticator`] that turns a login block into a verdict
//! - **World**: game hooks fed by decoded client events

pub mod login;
pub mod population;
pub mod profile;
pub mod world;

pub use login::{Admitted, Authenticator, Verdict};
pub use population::{Population, PopulationSlot, ReserveError};
pub use profile::{BanList, LoadFailure, MemoryBanList, MemoryProfileStore, Profile, ProfileStore};
pub use world::{Actor, EventOutcome, LoggingWorld, Outbox, World};
