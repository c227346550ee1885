//! Provisioning engine seam.
//!
//! The engine applies desired-state resource nodes with create-or-update
//! semantics keyed by stable name, reports appliance status, and broadcasts
//! events so callers can await activation without polling.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{EngineError, Result};
pub use event::Event;
pub use memory::{InMemoryEngine, StoredResource};
pub use traits::{ApplianceStatus, ApplyOutcome, ProvisioningEngine};
