//! Authentication settings and auth-mode selection.
//!
//! [`ClientConfig`] is the decoded form of the credential keys of the
//! configuration. [`ClientConfig::auth_options`] picks exactly one
//! [`AuthType`] and produces the [`AuthOptions`] handed to the client
//! factory, which validates them before any network call.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use strum::Display;

use super::environment::CloudEnvironmentName;
use crate::error::DtlError;

/// Default lifetime of the client assertion signed with a certificate.
pub const DEFAULT_CERT_TOKEN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Shortest accepted certificate assertion lifetime, and the minimum
/// remaining validity of a supplied client JWT.
pub const MIN_TOKEN_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// Authentication mode used to obtain management-plane tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AuthType {
    /// Tokens from `az account get-access-token`
    AzureCli,
    /// Federated OIDC token exchanged as a client assertion
    Oidc,
    /// Service principal with a client secret
    ClientSecret,
    /// Service principal with a PEM certificate
    ClientCert,
    /// Service principal with a pre-signed client assertion
    ClientJwt,
    /// Managed identity via the instance metadata service
    ManagedIdentity,
}

/// Credential settings decoded from configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub cloud_environment_name: CloudEnvironmentName,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_cert_path: Option<Utf8PathBuf>,
    pub client_cert_token_timeout: Duration,
    pub client_jwt: Option<String>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub use_azure_cli_auth: bool,
    pub oidc_request_url: Option<String>,
    pub oidc_request_token: Option<String>,
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("cloud_environment_name", &self.cloud_environment_name)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("client_cert_path", &self.client_cert_path)
            .field("client_cert_token_timeout", &self.client_cert_token_timeout)
            .field("client_jwt", &redacted(&self.client_jwt))
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .field("use_azure_cli_auth", &self.use_azure_cli_auth)
            .field("oidc_request_url", &self.oidc_request_url)
            .field("oidc_request_token", &redacted(&self.oidc_request_token))
            .finish()
    }
}

/// Treats empty strings the same as unset values.
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ClientConfig {
    /// Selects the authentication mode.
    ///
    /// Azure CLI auth wins when enabled. Otherwise at most one of the
    /// service-principal credential kinds may be configured; with none of
    /// them the managed identity of the host is used.
    pub fn auth_type(&self) -> Result<AuthType, DtlError> {
        if self.use_azure_cli_auth {
            return Ok(AuthType::AzureCli);
        }

        let mut selected = Vec::new();
        if non_empty(&self.oidc_request_url).is_some()
            || non_empty(&self.oidc_request_token).is_some()
        {
            selected.push(AuthType::Oidc);
        }
        if non_empty(&self.client_secret).is_some() {
            selected.push(AuthType::ClientSecret);
        }
        if self.client_cert_path.is_some() {
            selected.push(AuthType::ClientCert);
        }
        if non_empty(&self.client_jwt).is_some() {
            selected.push(AuthType::ClientJwt);
        }

        match selected.as_slice() {
            [] => Ok(AuthType::ManagedIdentity),
            [single] => Ok(*single),
            _ => Err(DtlError::Authentication(format!(
                "specify exactly one of client_secret, client_cert_path, client_jwt \
                or oidc_request_url/oidc_request_token (found: {})",
                selected
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Derives the options for client construction.
    pub fn auth_options(&self) -> Result<AuthOptions, DtlError> {
        Ok(AuthOptions {
            auth_type: self.auth_type()?,
            client_id: non_empty(&self.client_id),
            client_secret: non_empty(&self.client_secret),
            client_jwt: non_empty(&self.client_jwt),
            client_cert_path: self.client_cert_path.clone(),
            client_cert_token_timeout: self.client_cert_token_timeout,
            oidc_request_url: non_empty(&self.oidc_request_url),
            oidc_request_token: non_empty(&self.oidc_request_token),
            tenant_id: non_empty(&self.tenant_id),
            subscription_id: non_empty(&self.subscription_id),
        })
    }
}

/// Inputs of client construction for one invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthOptions {
    pub auth_type: AuthType,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_jwt: Option<String>,
    pub client_cert_path: Option<Utf8PathBuf>,
    pub client_cert_token_timeout: Duration,
    pub oidc_request_url: Option<String>,
    pub oidc_request_token: Option<String>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("auth_type", &self.auth_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("client_jwt", &redacted(&self.client_jwt))
            .field("client_cert_path", &self.client_cert_path)
            .field("oidc_request_url", &self.oidc_request_url)
            .field("oidc_request_token", &redacted(&self.oidc_request_token))
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, mode: AuthType) -> Result<&'a str, DtlError> {
    value.as_deref().ok_or_else(|| {
        DtlError::Authentication(format!("{} is required for {} authentication", field, mode))
    })
}

#[derive(Deserialize)]
struct JwtExpiry {
    exp: i64,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
fn jwt_expiry(token: &str) -> Result<i64, DtlError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);
    decode::<JwtExpiry>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .map_err(|e| DtlError::Authentication(format!("client_jwt is invalid: {}", e)))
}

impl AuthOptions {
    /// Checks that the fields the selected mode needs are present.
    ///
    /// Performs no network I/O.
    pub fn validate(&self) -> Result<(), DtlError> {
        let mode = self.auth_type;
        match mode {
            AuthType::AzureCli | AuthType::ManagedIdentity => {}
            AuthType::ClientSecret => {
                required(&self.client_id, "client_id", mode)?;
                required(&self.client_secret, "client_secret", mode)?;
                self.require_subscription()?;
            }
            AuthType::ClientCert => {
                required(&self.client_id, "client_id", mode)?;
                if self.client_cert_path.is_none() {
                    return Err(DtlError::Authentication(format!(
                        "client_cert_path is required for {} authentication",
                        mode
                    )));
                }
                if self.client_cert_token_timeout < MIN_TOKEN_VALIDITY {
                    return Err(DtlError::Authentication(format!(
                        "client_cert_token_timeout must be at least {}",
                        humantime::format_duration(MIN_TOKEN_VALIDITY)
                    )));
                }
                self.require_subscription()?;
            }
            AuthType::ClientJwt => {
                required(&self.client_id, "client_id", mode)?;
                let jwt = required(&self.client_jwt, "client_jwt", mode)?;
                let remaining = jwt_expiry(jwt)? - chrono::Utc::now().timestamp();
                if remaining < MIN_TOKEN_VALIDITY.as_secs() as i64 {
                    return Err(DtlError::Authentication(format!(
                        "client_jwt must be valid for at least {}",
                        humantime::format_duration(MIN_TOKEN_VALIDITY)
                    )));
                }
                self.require_subscription()?;
            }
            AuthType::Oidc => {
                required(&self.client_id, "client_id", mode)?;
                let url = required(&self.oidc_request_url, "oidc_request_url", mode)?;
                required(&self.oidc_request_token, "oidc_request_token", mode)?;
                url::Url::parse(url).map_err(|e| {
                    DtlError::Authentication(format!("oidc_request_url is not a valid URL: {}", e))
                })?;
                self.require_subscription()?;
            }
        }
        Ok(())
    }

    fn require_subscription(&self) -> Result<(), DtlError> {
        required(&self.subscription_id, "subscription_id", self.auth_type).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn secret_config() -> ClientConfig {
        ClientConfig {
            client_id: Some("app".to_string()),
            client_secret: Some("s3cret".to_string()),
            subscription_id: Some("sub1".to_string()),
            client_cert_token_timeout: DEFAULT_CERT_TOKEN_TIMEOUT,
            ..Default::default()
        }
    }

    fn signed_jwt(claims: serde_json::Value) -> String {
        let key = EncodingKey::from_secret(b"issuer-key");
        encode(&Header::default(), &claims, &key).unwrap()
    }

    fn jwt_with_exp(exp: i64) -> String {
        signed_jwt(serde_json::json!({"sub": "app", "exp": exp}))
    }

    #[test]
    fn test_no_credentials_selects_managed_identity() {
        let config = ClientConfig::default();
        assert_eq!(config.auth_type().unwrap(), AuthType::ManagedIdentity);
    }

    #[test]
    fn test_client_id_alone_selects_managed_identity() {
        let config = ClientConfig {
            client_id: Some("user-assigned".to_string()),
            ..Default::default()
        };
        assert_eq!(config.auth_type().unwrap(), AuthType::ManagedIdentity);
    }

    #[test]
    fn test_secret_selects_client_secret() {
        assert_eq!(secret_config().auth_type().unwrap(), AuthType::ClientSecret);
    }

    #[test]
    fn test_cli_auth_takes_priority() {
        let config = ClientConfig {
            use_azure_cli_auth: true,
            ..secret_config()
        };
        assert_eq!(config.auth_type().unwrap(), AuthType::AzureCli);
    }

    #[test]
    fn test_empty_secret_is_unset() {
        let config = ClientConfig {
            client_secret: Some("  ".to_string()),
            ..secret_config()
        };
        assert_eq!(config.auth_type().unwrap(), AuthType::ManagedIdentity);
    }

    #[test]
    fn test_ambiguous_credentials_rejected() {
        let config = ClientConfig {
            client_jwt: Some(jwt_with_exp(0)),
            ..secret_config()
        };
        let err = config.auth_type().unwrap_err();
        assert!(matches!(err, DtlError::Authentication(_)));
        assert!(err.to_string().contains("client-secret, client-jwt"), "got: {}", err);
    }

    #[test]
    fn test_secret_mode_without_secret_fails_validation() {
        let options = AuthOptions {
            client_secret: None,
            ..secret_config().auth_options().unwrap()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(err, DtlError::Authentication(_)));
        assert!(err.to_string().contains("client_secret is required"));
    }

    #[test]
    fn test_secret_mode_requires_subscription() {
        let config = ClientConfig {
            subscription_id: None,
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("subscription_id is required"));
    }

    #[test]
    fn test_secret_mode_requires_client_id() {
        let config = ClientConfig {
            client_id: None,
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("client_id is required"));
    }

    #[test]
    fn test_managed_identity_needs_nothing() {
        let options = ClientConfig::default().auth_options().unwrap();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cert_token_timeout_minimum() {
        let config = ClientConfig {
            client_secret: None,
            client_cert_path: Some("/tmp/cert.pem".into()),
            client_cert_token_timeout: Duration::from_secs(60),
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("client_cert_token_timeout"));
    }

    #[test]
    fn test_jwt_expiring_soon_rejected() {
        let config = ClientConfig {
            client_secret: None,
            client_jwt: Some(jwt_with_exp(chrono::Utc::now().timestamp() + 60)),
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("client_jwt must be valid"));
    }

    #[test]
    fn test_jwt_with_long_validity_accepted() {
        let config = ClientConfig {
            client_secret: None,
            client_jwt: Some(jwt_with_exp(chrono::Utc::now().timestamp() + 3600)),
            ..secret_config()
        };
        assert!(config.auth_options().unwrap().validate().is_ok());
    }

    #[test]
    fn test_malformed_jwt_rejected() {
        let config = ClientConfig {
            client_secret: None,
            client_jwt: Some("not-a-jwt".to_string()),
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("client_jwt is invalid"));
    }

    #[test]
    fn test_jwt_without_exp_rejected() {
        let config = ClientConfig {
            client_secret: None,
            client_jwt: Some(signed_jwt(serde_json::json!({"sub": "app"}))),
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(matches!(err, DtlError::Authentication(_)));
        assert!(err.to_string().contains("client_jwt is invalid"), "got: {}", err);
        assert!(err.to_string().contains("exp"), "got: {}", err);
    }

    #[test]
    fn test_jwt_signature_is_not_checked() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = jwt_with_exp(exp);
        let (unsigned, _) = token.rsplit_once('.').unwrap();
        assert_eq!(jwt_expiry(&format!("{}.forged", unsigned)).unwrap(), exp);
    }

    #[test]
    fn test_oidc_requires_token() {
        let config = ClientConfig {
            client_secret: None,
            oidc_request_url: Some("https://token.actions.example/".to_string()),
            ..secret_config()
        };
        let err = config.auth_options().unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("oidc_request_token is required"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", secret_config());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
