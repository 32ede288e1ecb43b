use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dtlartifact::azure::{
    AuthOptions, ClientFactory, ClientTimeouts, CloudEnvironmentName, DevTestLabsApi,
};
use dtlartifact::dtl::{ApplyArtifactsRequest, VirtualMachineId};
use dtlartifact::error::DtlError;
use serde_yaml::Value;

/// Parses a YAML literal into a configuration fragment.
#[allow(dead_code)]
pub fn fragment(source: &str) -> Value {
    serde_yaml::from_str(source).expect("fixture must be valid YAML")
}

/// Minimal valid configuration with a client secret and explicit IDs.
#[allow(dead_code)]
pub const BASE_CONFIG: &str = r#"
lab_name: lab1
lab_resource_group_name: rg1
vm_name: vm1
subscription_id: sub1
tenant_id: tenant1
client_id: app
client_secret: secret
"#;

/// How the fake client answers `apply_artifacts_then_poll`.
#[allow(dead_code)]
#[derive(Clone)]
pub enum Outcome {
    Succeed,
    Fail(u16, String, String),
    Hang,
}

#[allow(dead_code)]
#[derive(Default)]
pub struct Recorded {
    pub created: Vec<(CloudEnvironmentName, ClientTimeouts, AuthOptions)>,
    pub applied: Vec<(VirtualMachineId, ApplyArtifactsRequest)>,
}

/// [`ClientFactory`] handing out in-memory clients that record each call.
#[allow(dead_code)]
pub struct FakeFactory {
    pub recorded: Arc<Mutex<Recorded>>,
    outcome: Outcome,
    polling_duration: Option<Duration>,
}

#[allow(dead_code)]
impl FakeFactory {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            outcome,
            polling_duration: None,
        }
    }

    pub fn with_polling_duration(mut self, duration: Duration) -> Self {
        self.polling_duration = Some(duration);
        self
    }
}

#[allow(dead_code)]
struct FakeClient {
    recorded: Arc<Mutex<Recorded>>,
    outcome: Outcome,
    subscription_id: String,
    polling_duration: Duration,
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(
        &self,
        environment: CloudEnvironmentName,
        timeouts: ClientTimeouts,
        options: &AuthOptions,
    ) -> Result<Box<dyn DevTestLabsApi>, DtlError> {
        options.validate()?;
        self.recorded
            .lock()
            .unwrap()
            .created
            .push((environment, timeouts, options.clone()));
        Ok(Box::new(FakeClient {
            recorded: Arc::clone(&self.recorded),
            outcome: self.outcome.clone(),
            subscription_id: options.subscription_id.clone().unwrap_or_default(),
            polling_duration: self.polling_duration.unwrap_or(timeouts.create),
        }))
    }
}

#[async_trait]
impl DevTestLabsApi for FakeClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn polling_duration(&self) -> Duration {
        self.polling_duration
    }

    async fn apply_artifacts_then_poll(
        &self,
        vm: &VirtualMachineId,
        request: &ApplyArtifactsRequest,
    ) -> Result<(), DtlError> {
        self.recorded
            .lock()
            .unwrap()
            .applied
            .push((vm.clone(), request.clone()));
        match &self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail(status, code, message) => Err(DtlError::Request {
                status: *status,
                code: code.clone(),
                message: message.clone(),
            }),
            Outcome::Hang => std::future::pending().await,
        }
    }
}
