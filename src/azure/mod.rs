//! Azure control-plane access.
//!
//! This module provides the two seams the provisioner depends on:
//!
//! - [`ClientFactory`]: builds an authenticated client from [`AuthOptions`]
//! - [`DevTestLabsApi`]: the DevTest Labs operations the provisioner calls
//!
//! [`AzureClientFactory`] and [`AzureClient`] are the production
//! implementations talking to Azure Resource Manager over HTTPS.

use std::time::Duration;

use async_trait::async_trait;

pub mod auth;
pub mod client;
pub mod credential;
pub mod environment;

pub use auth::{AuthOptions, AuthType, ClientConfig};
pub use client::{AzureClient, AzureClientFactory, ClientTimeouts};
pub use environment::{CloudEnvironment, CloudEnvironmentName};

use crate::dtl::{ApplyArtifactsRequest, VirtualMachineId};
use crate::error::DtlError;

/// DevTest Labs virtual machine operations.
///
/// Implementations must be `Send + Sync` so a client can be driven from any
/// task of the runtime.
#[async_trait]
pub trait DevTestLabsApi: Send + Sync {
    /// Subscription the client is bound to.
    fn subscription_id(&self) -> &str;

    /// Longest time a long-running operation may take.
    fn polling_duration(&self) -> Duration;

    /// Submits `request` and waits for the operation to reach a terminal state.
    async fn apply_artifacts_then_poll(
        &self,
        vm: &VirtualMachineId,
        request: &ApplyArtifactsRequest,
    ) -> Result<(), DtlError>;
}

/// Builds authenticated [`DevTestLabsApi`] clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Validates `options` and constructs a client for `environment`.
    async fn create(
        &self,
        environment: CloudEnvironmentName,
        timeouts: ClientTimeouts,
        options: &AuthOptions,
    ) -> Result<Box<dyn DevTestLabsApi>, DtlError>;
}
