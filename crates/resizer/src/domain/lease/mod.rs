//! Per-key mutual exclusion between concurrently executing actions.
//!
//! - [`LeaseRegistry`]: the shared lease table
//! - [`LockHelper`]: acquire / heartbeat / release on one key

pub mod lock_helper;
pub mod registry;

pub use lock_helper::LockHelper;
pub use registry::LeaseId;
pub use registry::LeaseRegistry;
