//! Provisioners module.
//!
//! A provisioner is prepared once with the configuration fragments supplied
//! by its host, then invoked against a machine the host already built.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::communicator::Communicator;
use crate::config::HostSettings;
use crate::error::DtlError;
use crate::ui::Ui;

pub mod dtl_artifact;

/// Trait for provisioner implementations.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Resolves and validates configuration. Performs no network I/O.
    ///
    /// # Arguments
    /// * `fragments` - Configuration mappings, merged in order
    /// * `host` - Settings supplied by the host, overriding the fragments
    fn prepare(&mut self, fragments: &[Value], host: &HostSettings) -> Result<(), DtlError>;

    /// Runs the provisioner.
    ///
    /// # Arguments
    /// * `cancel` - Cancelled by the host to abort the invocation
    /// * `ui` - Sink for progress lines
    /// * `communicator` - Channel to the machine being provisioned
    /// * `generated` - Values produced by the host at run time, for
    ///   implementations that render deferred templates themselves
    async fn provision(
        &mut self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        communicator: Arc<dyn Communicator>,
        generated: &BTreeMap<String, String>,
    ) -> Result<(), DtlError>;

    /// Returns the channel passed to the last [`Provisioner::provision`] call.
    fn communicator(&self) -> Option<Arc<dyn Communicator>>;
}
