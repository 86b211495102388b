pub mod config;
pub mod connection;
pub mod coordinator;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod stages;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use connection::{
    ConnectionClient, ConnectionHandle, ConnectionState, Connector, WebSocketConnector,
};
pub use coordinator::{Application, Collaborators, Coordinator, StartError};
pub use pipeline::{PipelineHandle, PipelineOrchestrator, Stage};
pub use record::SnapRecord;
