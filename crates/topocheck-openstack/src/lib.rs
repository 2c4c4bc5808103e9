//! OpenStack compute access for topology verification
//!
//! This crate provides:
//! - clouds.yaml / `OS_*` credential loading
//! - Keystone v3 authentication (password and application credential)
//! - `ComputeClient` trait and its Nova implementation for server group and server queries

pub mod auth;
pub mod client;
pub mod config;
pub mod types;

pub use auth::{authenticate, Session};
pub use client::{ComputeClient, NovaClient};
pub use config::{load_cloud, CloudConfig, DEFAULT_CLOUD_NAME};
pub use types::{Server, ServerGroup};

#[cfg(any(test, feature = "test-utils"))]
pub use client::MockComputeClient;
