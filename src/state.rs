//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! carries only a handle onto the hub and the loaded configuration; all
//! mutable bookkeeping lives inside the hub task.

use std::sync::Arc;

use crate::config::HubConfig;
use crate::hub::HubHandle;

#[derive(Clone, Debug)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<HubConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(hub: HubHandle, config: HubConfig) -> Self {
        Self { hub, config: Arc::new(config) }
    }
}
