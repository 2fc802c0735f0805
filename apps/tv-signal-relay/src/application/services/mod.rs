//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionRegistry`: one supervised chart session per subscriber

/// Per-subscriber session lifecycle management.
pub mod registry;

pub use registry::{RegistryError, SubscriptionRegistry};
