//! KDL configuration parsing for the pod submission pipeline.
//!
//! One file (`podpush.kdl` by default) configures the hosting repository,
//! database, pipeline policy, HTTP server and webhook secrets. Secrets can be
//! supplied through the environment instead of the file.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, GitHubConfig, PipelineConfig, ServerConfig, SystemConfig, WebhookConfig,
    load, parse_system_config,
};
