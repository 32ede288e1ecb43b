//! Provisioner configuration.
//!
//! Configuration arrives as one or more YAML mappings (fragments). They are
//! merged in order, interpolated (see [`crate::template`]), decoded with
//! unknown keys rejected, defaulted and validated. Nothing here touches the
//! network; the only I/O is reading the fragment files.

use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::azure::auth::{ClientConfig, DEFAULT_CERT_TOKEN_TIMEOUT};
use crate::azure::environment::CloudEnvironmentName;
use crate::dtl::{ArtifactSpec, VirtualMachineId};
use crate::error::DtlError;
use crate::template::{DeferredTemplate, Interpolator, TemplateContext, USER_VARIABLES_FIELD};

/// Polling duration used when none, or zero, is configured.
pub const DEFAULT_POLLING_DURATION: Duration = Duration::from_secs(15 * 60);

/// Settings supplied by the host running the provisioner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSettings {
    pub build_name: Option<String>,
    pub builder_type: Option<String>,
    pub debug: bool,
    pub force: bool,
    pub on_error: Option<String>,
    pub user_variables: BTreeMap<String, String>,
}

/// Raw, flat configuration keys as written by the user.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    dtl_artifacts: Option<Vec<ArtifactSpec>>,
    #[serde(default)]
    lab_name: String,
    #[serde(default)]
    lab_resource_group_name: String,
    #[serde(default)]
    vm_name: String,
    #[serde(default, with = "humantime_serde")]
    polling_duration_timeout: Option<Duration>,
    #[serde(default)]
    azure_tags: BTreeMap<String, String>,
    #[serde(default)]
    execute_command: Option<DeferredTemplate>,

    #[serde(default)]
    cloud_environment_name: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    client_cert_path: Option<Utf8PathBuf>,
    #[serde(default, with = "humantime_serde")]
    client_cert_token_timeout: Option<Duration>,
    #[serde(default)]
    client_jwt: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default)]
    use_azure_cli_auth: bool,
    #[serde(default)]
    oidc_request_url: Option<String>,
    #[serde(default)]
    oidc_request_token: Option<String>,

    #[serde(default)]
    build_name: Option<String>,
    #[serde(default)]
    builder_type: Option<String>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    on_error: Option<String>,
    #[serde(default)]
    user_variables: BTreeMap<String, String>,
}

/// Resolved, immutable provisioner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub lab_name: String,
    pub resource_group_name: String,
    pub vm_name: String,
    pub polling_duration_timeout: Duration,
    pub artifacts: Vec<ArtifactSpec>,
    pub client: ClientConfig,
    pub azure_tags: BTreeMap<String, String>,
    /// Command template rendered by its consumer with runtime values.
    pub execute_command: Option<DeferredTemplate>,
    pub host: HostSettings,
}

fn parse_cloud_environment(name: Option<&str>) -> Result<CloudEnvironmentName, DtlError> {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => Ok(CloudEnvironmentName::default()),
        Some(name) => CloudEnvironmentName::from_str(name).map_err(|_| {
            DtlError::Config(format!(
                "unknown cloud_environment_name '{}' (expected Public, China or USGovernment)",
                name
            ))
        }),
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = DtlError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let polling_duration_timeout = match raw.polling_duration_timeout {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_POLLING_DURATION,
        };

        let artifacts = raw.dtl_artifacts.unwrap_or_else(|| {
            warn!("dtl_artifacts is not set; no artifacts will be installed");
            Vec::new()
        });

        let client = ClientConfig {
            cloud_environment_name: parse_cloud_environment(raw.cloud_environment_name.as_deref())?,
            client_id: raw.client_id,
            client_secret: raw.client_secret,
            client_cert_path: raw.client_cert_path,
            client_cert_token_timeout: raw
                .client_cert_token_timeout
                .unwrap_or(DEFAULT_CERT_TOKEN_TIMEOUT),
            client_jwt: raw.client_jwt,
            tenant_id: raw.tenant_id,
            subscription_id: raw.subscription_id,
            use_azure_cli_auth: raw.use_azure_cli_auth,
            oidc_request_url: raw.oidc_request_url,
            oidc_request_token: raw.oidc_request_token,
        };

        Ok(Self {
            lab_name: raw.lab_name,
            resource_group_name: raw.lab_resource_group_name,
            vm_name: raw.vm_name,
            polling_duration_timeout,
            artifacts,
            client,
            azure_tags: raw.azure_tags,
            execute_command: raw.execute_command,
            host: HostSettings {
                build_name: raw.build_name,
                builder_type: raw.builder_type,
                debug: raw.debug,
                force: raw.force,
                on_error: raw.on_error,
                user_variables: raw.user_variables,
            },
        })
    }
}

impl Config {
    /// Validates the identity fields required before provisioning.
    pub fn validate(&self) -> Result<(), DtlError> {
        for (key, value) in [
            ("lab_name", &self.lab_name),
            ("lab_resource_group_name", &self.resource_group_name),
            ("vm_name", &self.vm_name),
        ] {
            if value.trim().is_empty() {
                return Err(DtlError::Config(format!("{} must be specified", key)));
            }
        }
        for (index, artifact) in self.artifacts.iter().enumerate() {
            if artifact.name.trim().is_empty() {
                return Err(DtlError::Config(format!(
                    "dtl_artifacts[{}].artifact_name must be specified",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Identifier of the target virtual machine within `subscription_id`.
    pub fn vm_id(&self, subscription_id: &str) -> VirtualMachineId {
        VirtualMachineId::new(
            subscription_id,
            &self.resource_group_name,
            &self.lab_name,
            &self.vm_name,
        )
    }
}

/// Deep-merges `overlay` into `base`.
///
/// Mappings merge key by key; any other value in `overlay` replaces the one
/// in `base`.
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merges configuration fragments in order; later fragments win.
pub fn merge_fragments(fragments: &[Value]) -> Result<Value, DtlError> {
    let mut merged = Value::Mapping(Mapping::new());
    for (index, fragment) in fragments.iter().enumerate() {
        match fragment {
            Value::Null => {}
            Value::Mapping(_) => merge_value(&mut merged, fragment.clone()),
            _ => {
                return Err(DtlError::Config(format!(
                    "configuration fragment {} must be a mapping",
                    index + 1
                )));
            }
        }
    }
    Ok(merged)
}

/// Renders host settings as a fragment merged after all others.
fn host_fragment(host: &HostSettings) -> Value {
    let mut map = Mapping::new();
    if let Some(name) = &host.build_name {
        map.insert("build_name".into(), name.clone().into());
    }
    if let Some(kind) = &host.builder_type {
        map.insert("builder_type".into(), kind.clone().into());
    }
    if host.debug {
        map.insert("debug".into(), true.into());
    }
    if host.force {
        map.insert("force".into(), true.into());
    }
    if let Some(policy) = &host.on_error {
        map.insert("on_error".into(), policy.clone().into());
    }
    if !host.user_variables.is_empty() {
        let vars: Mapping = host
            .user_variables
            .iter()
            .map(|(k, v)| (Value::from(k.clone()), Value::from(v.clone())))
            .collect();
        map.insert(USER_VARIABLES_FIELD.into(), Value::Mapping(vars));
    }
    Value::Mapping(map)
}

fn template_context(merged: &Value) -> Result<TemplateContext, DtlError> {
    let text = |key: &str| merged.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let user = match merged.get(USER_VARIABLES_FIELD) {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
            DtlError::Config(format!("{} must map names to strings: {}", USER_VARIABLES_FIELD, e))
        })?,
    };
    Ok(TemplateContext {
        build_name: text("build_name"),
        builder_type: text("builder_type"),
        user,
    })
}

/// Resolves configuration fragments into a validated [`Config`].
///
/// `host` overrides any build name, builder type or user variables found in
/// the fragments.
pub fn resolve(fragments: &[Value], host: &HostSettings) -> Result<Config, DtlError> {
    let mut merged = merge_fragments(fragments)?;
    merge_value(&mut merged, host_fragment(host));

    let context = template_context(&merged)?;
    debug!("interpolating configuration with {} user variable(s)", context.user.len());
    Interpolator::new(context).interpolate_config(&mut merged)?;

    let raw: RawConfig = serde_yaml::from_value(merged)
        .map_err(|e| DtlError::Config(format!("failed to decode configuration: {}", e)))?;
    let config = Config::try_from(raw)?;
    config.validate()?;
    Ok(config)
}

/// Reads one YAML fragment from `path`.
pub fn load_fragment(path: &Utf8Path) -> Result<Value, DtlError> {
    let content = fs::read_to_string(path).map_err(|e| DtlError::io(path.as_str(), e))?;
    serde_yaml::from_str(&content)
        .map_err(|e| DtlError::Config(format!("failed to parse YAML {}: {}", path, e)))
}

/// Loads and resolves the configuration files at `paths`, in order.
pub fn load_config(paths: &[Utf8PathBuf], host: &HostSettings) -> Result<Config, DtlError> {
    let fragments = paths
        .iter()
        .map(|path| load_fragment(path))
        .collect::<Result<Vec<_>, _>>()?;
    resolve(&fragments, host)
}
