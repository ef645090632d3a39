use std::sync::Arc;

use crate::domain::action::ResizeExecutor;
use crate::domain::lease::LeaseRegistry;

/// Application dependencies
pub struct ApplicationServices {
    pub executor: Arc<ResizeExecutor>,
    pub lease_registry: Arc<LeaseRegistry>,
}
