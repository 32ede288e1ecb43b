//! DevTest Labs artifact models and request assembly.
//!
//! [`ArtifactSpec`] is what the user configures. [`build_request`] turns a
//! list of them into the [`ApplyArtifactsRequest`] body of the
//! `applyArtifacts` operation, computing each artifact's resource identifier
//! on the way. Nothing here validates artifact names or parameter types; the
//! service does that.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// API version of the `Microsoft.DevTestLab` resource provider.
pub const API_VERSION: &str = "2018-09-15";

/// Artifact source every configured artifact is resolved against.
pub const PUBLIC_REPO: &str = "public repo";

/// Accepts any YAML scalar for a parameter value and keeps its text form.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected a scalar parameter value, got {:?}",
            other
        ))),
    }
}

fn default_parameter_type() -> String {
    "string".to_string()
}

/// One named parameter of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactParameter {
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub value: String,
    /// Declared parameter type. Informational only, never sent to the service.
    #[serde(rename = "type", default = "default_parameter_type")]
    pub kind: String,
}

/// An artifact to install, as configured by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    #[serde(rename = "artifact_name")]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ArtifactParameter>,
}

/// Resource identifier of a lab virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineId {
    pub subscription_id: String,
    pub resource_group: String,
    pub lab_name: String,
    pub vm_name: String,
}

impl VirtualMachineId {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        lab_name: impl Into<String>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            lab_name: lab_name.into(),
            vm_name: vm_name.into(),
        }
    }
}

impl fmt::Display for VirtualMachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DevTestLab/labs/{}/virtualmachines/{}",
            self.subscription_id, self.resource_group, self.lab_name, self.vm_name
        )
    }
}

/// Computes the resource identifier of a public-repository artifact.
///
/// The result is a plain string; the space in `public repo` is kept as is.
pub fn artifact_id(
    subscription_id: &str,
    resource_group: &str,
    lab_name: &str,
    artifact_name: &str,
) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DevTestLab/labs/{}/artifactSources/{}/artifacts/{}",
        subscription_id, resource_group, lab_name, PUBLIC_REPO, artifact_name
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactParameterProperties {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInstallProperties {
    pub artifact_id: String,
    pub artifact_title: String,
    pub parameters: Vec<ArtifactParameterProperties>,
}

/// Body of the `applyArtifacts` operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyArtifactsRequest {
    pub artifacts: Vec<ArtifactInstallProperties>,
}

impl ApplyArtifactsRequest {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Builds the install entry for one artifact of the lab addressed by `vm`.
pub fn install_properties(vm: &VirtualMachineId, artifact: &ArtifactSpec) -> ArtifactInstallProperties {
    ArtifactInstallProperties {
        artifact_id: artifact_id(&vm.subscription_id, &vm.resource_group, &vm.lab_name, &artifact.name),
        artifact_title: artifact.name.clone(),
        parameters: artifact
            .parameters
            .iter()
            .map(|p| ArtifactParameterProperties {
                name: p.name.clone(),
                value: p.value.clone(),
            })
            .collect(),
    }
}

/// Builds the request installing `artifacts`, in order, on `vm`.
///
/// An empty slice yields a request that installs nothing.
pub fn build_request(vm: &VirtualMachineId, artifacts: &[ArtifactSpec]) -> ApplyArtifactsRequest {
    ApplyArtifactsRequest {
        artifacts: artifacts
            .iter()
            .map(|artifact| install_properties(vm, artifact))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> VirtualMachineId {
        VirtualMachineId::new("sub1", "rg1", "lab1", "vm1")
    }

    fn parameter(name: &str, value: &str) -> ArtifactParameter {
        ArtifactParameter {
            name: name.to_string(),
            value: value.to_string(),
            kind: default_parameter_type(),
        }
    }

    #[test]
    fn test_artifact_id_template() {
        assert_eq!(
            artifact_id("sub1", "rg1", "lab1", "Install-WindowsUpdates"),
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.DevTestLab/labs/lab1/artifactSources/public repo/artifacts/Install-WindowsUpdates"
        );
    }

    #[test]
    fn test_artifact_id_is_idempotent() {
        let first = artifact_id("s", "g", "l", "a");
        let second = artifact_id("s", "g", "l", "a");
        assert_eq!(first, second);
    }

    #[test]
    fn test_vm_id_display() {
        assert_eq!(
            vm().to_string(),
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.DevTestLab/labs/lab1/virtualmachines/vm1"
        );
    }

    #[test]
    fn test_build_request_single_artifact() {
        let artifacts = vec![ArtifactSpec {
            name: "Install-WindowsUpdates".to_string(),
            parameters: vec![parameter("Category", "Critical")],
        }];

        let request = build_request(&vm(), &artifacts);

        assert_eq!(request.artifacts.len(), 1);
        let entry = &request.artifacts[0];
        assert_eq!(
            entry.artifact_id,
            "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.DevTestLab/labs/lab1/artifactSources/public repo/artifacts/Install-WindowsUpdates"
        );
        assert_eq!(entry.artifact_title, "Install-WindowsUpdates");
        assert_eq!(
            entry.parameters,
            vec![ArtifactParameterProperties {
                name: "Category".to_string(),
                value: "Critical".to_string(),
            }]
        );
    }

    #[test]
    fn test_build_request_preserves_order() {
        let artifacts = vec![
            ArtifactSpec {
                name: "b".to_string(),
                parameters: vec![parameter("z", "1"), parameter("a", "2")],
            },
            ArtifactSpec {
                name: "a".to_string(),
                parameters: vec![],
            },
        ];

        let request = build_request(&vm(), &artifacts);

        let titles: Vec<_> = request.artifacts.iter().map(|a| a.artifact_title.as_str()).collect();
        assert_eq!(titles, vec!["b", "a"]);
        let names: Vec<_> = request.artifacts[0].parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert!(request.artifacts[1].parameters.is_empty());
    }

    #[test]
    fn test_build_request_empty() {
        let request = build_request(&vm(), &[]);
        assert!(request.is_empty());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = build_request(
            &vm(),
            &[ArtifactSpec {
                name: "git".to_string(),
                parameters: vec![parameter("version", "2.44")],
            }],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "artifacts": [{
                    "artifactId": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.DevTestLab/labs/lab1/artifactSources/public repo/artifacts/git",
                    "artifactTitle": "git",
                    "parameters": [{"name": "version", "value": "2.44"}]
                }]
            })
        );
    }

    #[test]
    fn test_parameter_type_is_not_sent() {
        let mut p = parameter("count", "3");
        p.kind = "int".to_string();
        let entry = install_properties(
            &vm(),
            &ArtifactSpec {
                name: "x".to_string(),
                parameters: vec![p],
            },
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("int"));
    }

    #[test]
    fn test_parameter_scalar_values_decode_as_text() {
        let spec: ArtifactSpec = serde_yaml::from_str(
            r#"
artifact_name: windows-restart
parameters:
  - name: count
    value: 3
  - name: enabled
    value: true
    type: bool
"#,
        )
        .unwrap();
        assert_eq!(spec.parameters[0].value, "3");
        assert_eq!(spec.parameters[0].kind, "string");
        assert_eq!(spec.parameters[1].value, "true");
        assert_eq!(spec.parameters[1].kind, "bool");
    }
}
