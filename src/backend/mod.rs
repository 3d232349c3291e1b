//! Registration backend client

use crate::error::Result;
use async_trait::async_trait;

pub mod client;

pub use client::{QuickDeployClient, QuickDeployRequest};

/// Seam for the external registration backend; `QuickDeployClient` is the
/// production implementation.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Register a completed deployment, returning the backend's JSON object
    async fn register(&self, request: &QuickDeployRequest) -> Result<serde_json::Value>;
}
