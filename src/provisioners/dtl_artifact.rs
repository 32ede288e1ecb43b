//! DevTest Labs artifact provisioner.
//!
//! Installs the configured artifacts on a lab virtual machine with a single
//! `applyArtifacts` call and waits for the service to finish. Every artifact
//! goes in the same request, so the install is all or nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Value;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Provisioner;
use crate::azure::{ClientFactory, ClientTimeouts, DevTestLabsApi};
use crate::communicator::Communicator;
use crate::config::{self, Config, HostSettings};
use crate::dtl::{self, ApplyArtifactsRequest};
use crate::error::DtlError;
use crate::template::DeferredTemplate;
use crate::ui::Ui;

/// Lifecycle of one provisioning invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisionState {
    Idle,
    Authenticating,
    BuildingRequest,
    Submitting,
    Polling,
    Succeeded,
    Failed,
}

/// Provisioner applying DevTest Labs artifacts.
pub struct ArtifactProvisioner {
    config: Option<Config>,
    communicator: Option<Arc<dyn Communicator>>,
    factory: Arc<dyn ClientFactory>,
    state: ProvisionState,
}

impl ArtifactProvisioner {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            config: None,
            communicator: None,
            factory,
            state: ProvisionState::Idle,
        }
    }

    /// Resolved configuration, once prepared.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// The `execute_command` template, still unrendered. Runtime values such
    /// as generated passwords only exist on the consumer's side, which renders
    /// it with [`DeferredTemplate::render`].
    pub fn execute_command(&self) -> Option<&DeferredTemplate> {
        self.config.as_ref()?.execute_command.as_ref()
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    fn transition(&mut self, next: ProvisionState) {
        debug!(from = %self.state, to = %next, "provisioner state changed");
        self.state = next;
    }

    fn prepared(&self) -> Result<&Config, DtlError> {
        self.config
            .as_ref()
            .ok_or_else(|| DtlError::Config("provisioner has not been prepared".to_string()))
    }

    /// Builds the request `provision` would submit, without any network call.
    ///
    /// Needs an explicit `subscription_id` since nothing is discovered.
    pub fn dry_run(&self) -> Result<ApplyArtifactsRequest, DtlError> {
        let config = self.prepared()?;
        let options = config.client.auth_options()?;
        options.validate()?;
        let subscription_id = options.subscription_id.as_deref().ok_or_else(|| {
            DtlError::Config("subscription_id is required for a dry run".to_string())
        })?;
        Ok(dtl::build_request(&config.vm_id(subscription_id), &config.artifacts))
    }

    async fn create_client(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DevTestLabsApi>, DtlError> {
        let options = config.client.auth_options()?;
        let timeouts = ClientTimeouts::uniform(config.polling_duration_timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DtlError::Cancelled),
            client = self.factory.create(config.client.cloud_environment_name, timeouts, &options) => client,
        }
    }

    async fn run(
        &mut self,
        config: &Config,
        cancel: &CancellationToken,
        ui: &dyn Ui,
    ) -> Result<(), DtlError> {
        self.transition(ProvisionState::Authenticating);
        ui.message("Creating Azure DevTestLab (DTL) client ...");
        let client = match self.create_client(config, cancel).await {
            Ok(client) => client,
            Err(e) => {
                ui.error(&format!("Error creating DTL client: {}", e));
                return Err(e);
            }
        };

        self.transition(ProvisionState::BuildingRequest);
        ui.say("Installing Artifact DTL");
        let vm = config.vm_id(client.subscription_id());
        let request = dtl::build_request(&vm, &config.artifacts);
        if !config.azure_tags.is_empty() {
            debug!("azure tags: {:?}", config.azure_tags);
        }

        self.transition(ProvisionState::Submitting);
        ui.say("Applying artifact");
        info!("applying {} artifact(s) to {}", request.artifacts.len(), vm);

        let limit = client.polling_duration();
        self.transition(ProvisionState::Polling);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DtlError::Cancelled),
            result = tokio::time::timeout(limit, client.apply_artifacts_then_poll(&vm, &request)) => {
                result.unwrap_or_else(|_| Err(DtlError::Timeout(limit)))
            }
        };
        if let Err(e) = &outcome {
            ui.error(&format!("Error applying artifact: {}", e));
        }
        outcome
    }
}

#[async_trait]
impl Provisioner for ArtifactProvisioner {
    fn prepare(&mut self, fragments: &[Value], host: &HostSettings) -> Result<(), DtlError> {
        let config = config::resolve(fragments, host)?;
        debug!(
            "prepared provisioner for {}/{}/{} with {} artifact(s)",
            config.resource_group_name,
            config.lab_name,
            config.vm_name,
            config.artifacts.len()
        );
        self.config = Some(config);
        self.state = ProvisionState::Idle;
        Ok(())
    }

    async fn provision(
        &mut self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        communicator: Arc<dyn Communicator>,
        _generated: &BTreeMap<String, String>,
    ) -> Result<(), DtlError> {
        let config = self.prepared()?.clone();
        debug!("provisioning over {} communicator", communicator.kind());
        self.communicator = Some(communicator);
        ui.say("Running provisioner ...");

        let result = self.run(&config, cancel, ui).await;
        match &result {
            Ok(()) => {
                self.transition(ProvisionState::Succeeded);
                ui.say("Artifact installed");
            }
            Err(_) => self.transition(ProvisionState::Failed),
        }
        result
    }

    fn communicator(&self) -> Option<Arc<dyn Communicator>> {
        self.communicator.clone()
    }
}
