//! Azure Resource Manager client for DevTest Labs virtual machines.
//!
//! [`AzureClient::new`] turns validated [`AuthOptions`] into a token
//! credential, resolves the subscription and tenant when they were not
//! configured, and proves the credential by fetching a first token.
//! [`AzureClient::apply_artifacts_then_poll`] submits the operation and polls
//! it to a terminal state.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::auth::{AuthOptions, AuthType};
use super::credential::{
    AccessToken, AssertionSource, AzureCliCredential, CertificateSigner, ClientAssertionCredential,
    ClientSecretCredential, ManagedIdentityCredential, TokenCredential,
};
use super::environment::{CloudEnvironment, CloudEnvironmentName};
use super::{ClientFactory, DevTestLabsApi};
use crate::dtl::{self, ApplyArtifactsRequest, VirtualMachineId};
use crate::error::{DtlError, io_error_kind_message};

/// Poll interval used when the service sends no `Retry-After`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Tokens closer than this to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";

static AUTHORIZATION_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"authorization_uri="([^"]+)""#).expect("authorization_uri pattern is valid")
});

/// Per-operation timeouts of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Bound on create-style long-running operations; the polling duration.
    pub create: Duration,
    /// Bound on delete-style long-running operations.
    pub delete: Duration,
    /// Bound on each individual HTTP exchange.
    pub read: Duration,
}

impl ClientTimeouts {
    /// Uses the same duration for all three timeouts.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            create: duration,
            delete: duration,
            read: duration,
        }
    }
}

/// Authenticated client bound to one subscription.
pub struct AzureClient {
    http: reqwest::Client,
    environment: CloudEnvironment,
    subscription_id: String,
    credential: Box<dyn TokenCredential>,
    token: Mutex<Option<AccessToken>>,
    timeouts: ClientTimeouts,
    poll_interval: Duration,
}

fn subscription_from(options: &AuthOptions) -> Result<String, DtlError> {
    options.subscription_id.clone().ok_or_else(|| {
        DtlError::Authentication(format!(
            "subscription_id is required for {} authentication",
            options.auth_type
        ))
    })
}

fn client_id_from(options: &AuthOptions) -> Result<String, DtlError> {
    options.client_id.clone().ok_or_else(|| {
        DtlError::Authentication(format!(
            "client_id is required for {} authentication",
            options.auth_type
        ))
    })
}

/// Extracts the tenant from a `WWW-Authenticate` bearer challenge.
pub(crate) fn tenant_from_challenge(challenge: &str) -> Option<String> {
    let uri = AUTHORIZATION_URI.captures(challenge)?.get(1)?.as_str();
    let url = url::Url::parse(uri).ok()?;
    url.path_segments()?
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Discovers the tenant owning `subscription_id` from an unauthenticated request.
async fn discover_tenant_id(
    http: &reqwest::Client,
    environment: &CloudEnvironment,
    subscription_id: &str,
) -> Result<String, DtlError> {
    let url = format!("{}subscriptions/{}", environment.resource_manager, subscription_id);
    debug!("discovering tenant of subscription {}", subscription_id);
    let response = http
        .get(&url)
        .query(&[("api-version", SUBSCRIPTIONS_API_VERSION)])
        .send()
        .await
        .map_err(|e| DtlError::transport("failed to reach resource manager", e))?;

    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .and_then(tenant_from_challenge)
        .ok_or_else(|| {
            DtlError::Connectivity(format!(
                "could not discover the tenant of subscription {} (status {}); set tenant_id",
                subscription_id,
                response.status().as_u16()
            ))
        })
}

fn read_certificate(options: &AuthOptions) -> Result<CertificateSigner, DtlError> {
    let path = options.client_cert_path.as_ref().ok_or_else(|| {
        DtlError::Authentication("client_cert_path is required for client-cert authentication".to_string())
    })?;
    let pem = std::fs::read_to_string(path).map_err(|e| {
        DtlError::Authentication(format!(
            "failed to read client certificate {}: {}",
            path,
            io_error_kind_message(&e)
        ))
    })?;
    CertificateSigner::from_pem(&pem, options.client_cert_token_timeout)
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Deserialize, Default)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

/// Where to poll a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollTarget {
    /// `Azure-AsyncOperation`: returns a JSON status document.
    AsyncOperation(String),
    /// `Location`: returns 202 until the operation finishes.
    Location(String),
}

impl PollTarget {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        header(AZURE_ASYNC_OPERATION)
            .map(Self::AsyncOperation)
            .or_else(|| header("location").map(Self::Location))
    }

    fn url(&self) -> &str {
        match self {
            Self::AsyncOperation(url) | Self::Location(url) => url,
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Converts a non-success response into a [`DtlError::Request`].
async fn request_error(response: Response) -> DtlError {
    let status = response.status();
    error_from_body(status, response.text().await)
}

fn error_from_body<E: fmt::Display>(status: StatusCode, body: Result<String, E>) -> DtlError {
    let body = body.unwrap_or_else(|e| format!("response body could not be read: {}", e));
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_default();
    DtlError::Request {
        status: status.as_u16(),
        code: if detail.code.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            detail.code
        },
        message: if detail.message.is_empty() {
            body
        } else {
            detail.message
        },
    }
}

impl AzureClient {
    /// Builds an authenticated client.
    ///
    /// Fails with an authentication error, before any network call, when the
    /// options lack a field their mode needs.
    pub async fn new(
        environment: CloudEnvironment,
        timeouts: ClientTimeouts,
        options: &AuthOptions,
    ) -> Result<Self, DtlError> {
        options.validate()?;

        let http = reqwest::Client::builder()
            .timeout(timeouts.read)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DtlError::Connectivity(format!("failed to build HTTP client: {}", e)))?;

        let (credential, subscription_id): (Box<dyn TokenCredential>, String) =
            match options.auth_type {
                AuthType::AzureCli => {
                    let credential =
                        AzureCliCredential::locate(environment.clone(), options.tenant_id.clone())?;
                    let subscription_id = match &options.subscription_id {
                        Some(id) => id.clone(),
                        None => credential.subscription_id().await?,
                    };
                    (Box::new(credential), subscription_id)
                }
                AuthType::ManagedIdentity => {
                    let credential = ManagedIdentityCredential {
                        environment: environment.clone(),
                        client_id: options.client_id.clone(),
                    };
                    let subscription_id = match &options.subscription_id {
                        Some(id) => id.clone(),
                        None => credential.subscription_id(&http).await?,
                    };
                    (Box::new(credential), subscription_id)
                }
                AuthType::ClientSecret
                | AuthType::ClientCert
                | AuthType::ClientJwt
                | AuthType::Oidc => {
                    let subscription_id = subscription_from(options)?;
                    let client_id = client_id_from(options)?;
                    let tenant_id = match &options.tenant_id {
                        Some(id) => id.clone(),
                        None => discover_tenant_id(&http, &environment, &subscription_id).await?,
                    };
                    let credential: Box<dyn TokenCredential> = match options.auth_type {
                        AuthType::ClientSecret => Box::new(ClientSecretCredential {
                            environment: environment.clone(),
                            tenant_id,
                            client_id,
                            client_secret: options.client_secret.clone().unwrap_or_default(),
                        }),
                        _ => {
                            let source = match options.auth_type {
                                AuthType::ClientCert => {
                                    AssertionSource::Certificate(read_certificate(options)?)
                                }
                                AuthType::ClientJwt => {
                                    AssertionSource::Jwt(options.client_jwt.clone().unwrap_or_default())
                                }
                                _ => AssertionSource::Oidc {
                                    request_url: options.oidc_request_url.clone().unwrap_or_default(),
                                    request_token: options
                                        .oidc_request_token
                                        .clone()
                                        .unwrap_or_default(),
                                },
                            };
                            Box::new(ClientAssertionCredential {
                                environment: environment.clone(),
                                tenant_id,
                                client_id,
                                source,
                            })
                        }
                    };
                    (credential, subscription_id)
                }
            };

        let client = Self {
            http,
            environment,
            subscription_id,
            credential,
            token: Mutex::new(None),
            timeouts,
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        client.bearer().await?;
        info!(
            "authenticated with {} in {} cloud for subscription {}",
            options.auth_type, client.environment.name, client.subscription_id
        );
        debug!("client timeouts: {:?}", client.timeouts);
        Ok(client)
    }

    /// Overrides the interval between polls when the service sends no `Retry-After`.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeouts(&self) -> ClientTimeouts {
        self.timeouts
    }

    /// Returns a cached token, fetching a new one when close to expiry.
    async fn bearer(&self) -> Result<String, DtlError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_valid_for(TOKEN_REFRESH_MARGIN)
        {
            return Ok(token.token.clone());
        }
        debug!("fetching management access token");
        let token = self.credential.get_token(&self.http).await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn resource_url(&self, resource_path: &str) -> String {
        format!(
            "{}{}",
            self.environment.resource_manager,
            resource_path.trim_start_matches('/')
        )
    }

    async fn get(&self, url: &str) -> Result<Response, DtlError> {
        let token = self.bearer().await?;
        self.http
            .get(url)
            .bearer_auth(token)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| DtlError::transport("failed to poll operation status", e))
    }

    /// Polls an accepted operation until it reaches a terminal state.
    async fn poll(&self, target: PollTarget, mut delay: Duration) -> Result<(), DtlError> {
        debug!("polling {}", target.url());
        loop {
            tokio::time::sleep(delay).await;
            let response = self.get(target.url()).await?;
            let status = response.status();
            delay = retry_after(response.headers()).unwrap_or(self.poll_interval);

            match &target {
                PollTarget::AsyncOperation(_) => {
                    if !status.is_success() {
                        return Err(request_error(response).await);
                    }
                    let operation: OperationStatus = response.json().await.map_err(|e| {
                        DtlError::transport("failed to read operation status", e)
                    })?;
                    debug!("operation status: {}", operation.status);
                    match operation.status.to_ascii_lowercase().as_str() {
                        "succeeded" => return Ok(()),
                        "failed" | "canceled" | "cancelled" => {
                            let detail = operation.error.unwrap_or_default();
                            return Err(DtlError::Request {
                                status: status.as_u16(),
                                code: if detail.code.is_empty() {
                                    format!("Operation{}", operation.status)
                                } else {
                                    detail.code
                                },
                                message: detail.message,
                            });
                        }
                        _ => {}
                    }
                }
                PollTarget::Location(_) => match status {
                    StatusCode::ACCEPTED => debug!("operation still running"),
                    s if s.is_success() => return Ok(()),
                    _ => return Err(request_error(response).await),
                },
            }
        }
    }
}

#[async_trait]
impl DevTestLabsApi for AzureClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn polling_duration(&self) -> Duration {
        self.timeouts.create
    }

    async fn apply_artifacts_then_poll(
        &self,
        vm: &VirtualMachineId,
        request: &ApplyArtifactsRequest,
    ) -> Result<(), DtlError> {
        let url = self.resource_url(&format!("{}/applyArtifacts", vm));
        let token = self.bearer().await?;
        debug!("POST {} ({} artifact(s))", url, request.artifacts.len());

        let response = self
            .http
            .post(&url)
            .query(&[("api-version", dtl::API_VERSION)])
            .bearer_auth(token)
            .header("x-ms-client-request-id", uuid::Uuid::new_v4().to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| DtlError::transport("failed to submit applyArtifacts", e))?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                let delay = retry_after(response.headers()).unwrap_or(self.poll_interval);
                match PollTarget::from_headers(response.headers()) {
                    Some(target) => self.poll(target, delay).await,
                    None => {
                        warn!("operation accepted without a status URL; not polling");
                        Ok(())
                    }
                }
            }
            _ => Err(request_error(response).await),
        }
    }
}

/// Creates [`AzureClient`]s against the real, or a stand-in, Azure endpoint.
#[derive(Debug, Clone)]
pub struct AzureClientFactory {
    base_url: Option<String>,
    poll_interval: Duration,
}

impl Default for AzureClientFactory {
    fn default() -> Self {
        Self {
            base_url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AzureClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends every request (identity, metadata, management) to `base_url`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn environment(&self, name: CloudEnvironmentName) -> CloudEnvironment {
        match &self.base_url {
            Some(base) => CloudEnvironment::with_base_url(name, base.clone()),
            None => CloudEnvironment::from_name(name),
        }
    }
}

#[async_trait]
impl ClientFactory for AzureClientFactory {
    async fn create(
        &self,
        environment: CloudEnvironmentName,
        timeouts: ClientTimeouts,
        options: &AuthOptions,
    ) -> Result<Box<dyn DevTestLabsApi>, DtlError> {
        let client = AzureClient::new(self.environment(environment), timeouts, options)
            .await?
            .with_poll_interval(self.poll_interval);
        Ok(Box::new(client))
    }
}
