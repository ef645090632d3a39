pub mod action;
pub mod lease;
