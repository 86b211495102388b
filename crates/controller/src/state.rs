use snap_core::{Config, ConnectionState, SanitizedConfig};
use tokio::sync::watch;

/// Shared application state
pub struct AppState {
    config: Config,
    connection_state: watch::Receiver<ConnectionState>,
}

impl AppState {
    pub fn new(config: Config, connection_state: watch::Receiver<ConnectionState>) -> Self {
        Self {
            config,
            connection_state,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }
}
