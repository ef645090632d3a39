mod api;
pub mod app;
pub mod config;
mod domain;
mod infrastructure;

pub use domain::action;
pub use domain::lease;
pub use infrastructure::k8s;
