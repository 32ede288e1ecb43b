//! Azure cloud environments and their endpoints.

use serde::Serialize;
use strum::{Display, EnumString};

/// Name of a supported Azure cloud.
///
/// Parsing is case-insensitive and accepts both the short names and the
/// `Azure*Cloud` names used by the Azure CLI.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum CloudEnvironmentName {
    /// Azure public cloud (default)
    #[default]
    #[strum(to_string = "Public", serialize = "AzurePublicCloud")]
    Public,
    /// Azure operated by 21Vianet
    #[strum(to_string = "China", serialize = "AzureChinaCloud")]
    China,
    /// Azure US Government
    #[strum(to_string = "USGovernment", serialize = "AzureUSGovernmentCloud")]
    USGovernment,
}

const IMDS_ENDPOINT: &str = "http://169.254.169.254/";

/// Endpoints the client talks to for one cloud.
///
/// All endpoint strings end with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    pub name: CloudEnvironmentName,
    /// Azure Resource Manager base URL.
    pub resource_manager: String,
    /// Microsoft Entra ID authority host.
    pub authority_host: String,
    /// Audience of management-plane access tokens.
    pub token_audience: String,
    /// Instance metadata service base URL.
    pub metadata_endpoint: String,
}

fn with_trailing_slash(endpoint: impl Into<String>) -> String {
    let mut endpoint = endpoint.into();
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    endpoint
}

impl CloudEnvironment {
    /// Returns the well-known endpoints of a named cloud.
    pub fn from_name(name: CloudEnvironmentName) -> Self {
        let (resource_manager, authority_host) = match name {
            CloudEnvironmentName::Public => {
                ("https://management.azure.com/", "https://login.microsoftonline.com/")
            }
            CloudEnvironmentName::China => {
                ("https://management.chinacloudapi.cn/", "https://login.chinacloudapi.cn/")
            }
            CloudEnvironmentName::USGovernment => {
                ("https://management.usgovcloudapi.net/", "https://login.microsoftonline.us/")
            }
        };
        Self {
            name,
            resource_manager: resource_manager.to_string(),
            authority_host: authority_host.to_string(),
            token_audience: resource_manager.to_string(),
            metadata_endpoint: IMDS_ENDPOINT.to_string(),
        }
    }

    /// Points every endpoint at `base`, keeping the named cloud's token audience.
    ///
    /// Used to run the client against a local stand-in of the Azure APIs.
    pub fn with_base_url(name: CloudEnvironmentName, base: impl Into<String>) -> Self {
        let base = with_trailing_slash(base);
        Self {
            resource_manager: base.clone(),
            authority_host: base.clone(),
            metadata_endpoint: base,
            ..Self::from_name(name)
        }
    }

    /// OAuth2 scope requesting a management-plane token.
    pub fn scope(&self) -> String {
        format!("{}.default", self.token_audience)
    }

    /// Token endpoint of `tenant_id`.
    pub fn token_endpoint(&self, tenant_id: &str) -> String {
        format!("{}{}/oauth2/v2.0/token", self.authority_host, tenant_id)
    }
}
