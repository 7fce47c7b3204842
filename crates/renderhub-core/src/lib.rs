//! renderhub-core — shared domain types and configuration for RenderHub.

pub mod config;
pub mod directory;
pub mod types;

pub use config::HubConfig;
pub use directory::EnvironmentDirectory;
pub use types::*;
