//! Container resize actions
//!
//! A resize request is validated, converted into a [`ResizeSpec`] and applied
//! by replacing the hosting pod. Controlled pods go through a scheduler swap
//! on their parent so the controller cannot race the replacement.

pub mod executor;
#[cfg(test)]
pub(crate) mod mock;
pub mod mutation;
pub mod resize_spec;
pub mod scheduler_helper;
pub mod traits;
pub mod types;
pub mod verify;

pub use executor::ResizeExecutor;
pub use resize_spec::CapacityTarget;
pub use resize_spec::ResizeSpec;
pub use scheduler_helper::SchedulerHelper;
pub use traits::ClusterApi;
pub use traits::NodeMeasurement;
pub use traits::TemplateScheduler;
pub use types::ActionError;
pub use types::ActionOutcome;
pub use types::ControllerKind;
pub use types::ParentRef;
