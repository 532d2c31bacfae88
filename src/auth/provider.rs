//! Token acquisition against Azure AD: client-credentials for daemon calls,
//! OAuth2 device code flow for delegated (user) calls.

use std::time::Duration;

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, DeviceAuthorizationUrl, DeviceCodeErrorResponse,
    DeviceCodeErrorResponseType, RequestTokenError, Scope, StandardDeviceAuthorizationResponse,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{Token, TokenMode};
use crate::config::Settings;
use crate::error::{Result, WatchError};

/// Application-mode scope: everything the app registration was granted.
const APP_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Delegated scope for channel-message subscriptions.
const DELEGATED_SCOPE: &str = "ChannelMessage.Read.All";

const MAX_TOKEN_ATTEMPTS: u32 = 3;

/// Anything that can produce a bearer token for a given credential mode.
/// The seam SubscriptionManager and the sinks are written against.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self, mode: TokenMode) -> Result<Token>;

    /// Drop any cached token for `mode`, forcing the next acquire back to
    /// the identity provider. Called after Graph rejects a token that still
    /// looked valid locally (revocation, policy change, clock skew).
    async fn invalidate(&self, _mode: TokenMode) {}
}

/// Live token provider backed by the Azure AD token endpoint.
///
/// Delegated tokens are cached in memory and reused silently while valid;
/// a cache miss starts a device-code flow, which blocks on the operator and
/// is bounded by `device_flow_timeout`.
pub struct TokenProvider {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: Option<String>,
    device_flow_timeout: Duration,
    delegated_cache: Mutex<Option<Token>>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl TokenProvider {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            tenant_id: settings.tenant_id.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            device_flow_timeout: settings.device_flow_timeout,
            delegated_cache: Mutex::new(None),
        }
    }

    fn token_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        )
    }

    /// Client-credentials grant: one form POST to the token endpoint.
    /// Transport failures are retried with doubling backoff; a non-success
    /// HTTP status is a credential problem and is surfaced immediately.
    async fn acquire_app_token(&self) -> Result<Token> {
        let secret = self.client_secret.as_deref().ok_or_else(|| {
            WatchError::Auth("CLIENT_SECRET is required for application-mode tokens".into())
        })?;
        let url = self.token_endpoint();
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret),
            ("grant_type", "client_credentials"),
            ("scope", APP_SCOPE),
        ];

        let mut delay = Duration::from_millis(500);
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            match self.http.post(&url).form(&form).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !status.is_success() {
                        return Err(WatchError::Auth(format!(
                            "token endpoint returned HTTP {}: {}",
                            status.as_u16(),
                            body
                        )));
                    }
                    return parse_token_response(&body, TokenMode::Application);
                }
                Err(e) if attempt < MAX_TOKEN_ATTEMPTS => {
                    tracing::warn!(
                        "token endpoint unreachable (attempt {}/{}): {:#}",
                        attempt,
                        MAX_TOKEN_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(WatchError::Transport(e)),
            }
        }
        unreachable!("loop returns on every branch of the final attempt")
    }

    fn build_oauth_client(&self) -> Result<BasicClient> {
        let auth_url = AuthUrl::new(format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
            self.tenant_id
        ))
        .map_err(|e| WatchError::Auth(e.to_string()))?;
        let token_url = TokenUrl::new(self.token_endpoint())
            .map_err(|e| WatchError::Auth(e.to_string()))?;
        let device_url = DeviceAuthorizationUrl::new(format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/devicecode",
            self.tenant_id
        ))
        .map_err(|e| WatchError::Auth(e.to_string()))?;

        Ok(
            BasicClient::new(ClientId::new(self.client_id.clone()), None, auth_url, Some(token_url))
                .set_device_authorization_url(device_url),
        )
    }

    /// Delegated token: silent cache reuse first, device-code flow on miss.
    /// The cache lock is held across the flow so concurrent callers cannot
    /// start a second interactive sign-in.
    async fn acquire_delegated_token(&self) -> Result<Token> {
        let mut cache = self.delegated_cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if !token.is_expired() {
                tracing::debug!("reusing cached delegated token");
                return Ok(token.clone());
            }
            *cache = None;
        }

        let client = self.build_oauth_client()?;

        tracing::info!("Initiating device code flow...");
        let device_auth: StandardDeviceAuthorizationResponse = client
            .exchange_device_code()
            .map_err(|e| WatchError::Auth(e.to_string()))?
            .add_scope(Scope::new(DELEGATED_SCOPE.to_string()))
            .add_scope(Scope::new("offline_access".to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| WatchError::Auth(format!("device code request failed: {e}")))?;

        println!();
        println!(
            "To sign in, visit: {}",
            device_auth.verification_uri().as_str()
        );
        println!("Enter code:        {}", device_auth.user_code().secret());
        println!();

        tracing::info!("Waiting for authentication...");
        let exchange = client
            .exchange_device_access_token(&device_auth)
            .request_async(oauth2::reqwest::async_http_client, tokio::time::sleep, None);

        let token_response = match tokio::time::timeout(self.device_flow_timeout, exchange).await {
            Err(_) => return Err(WatchError::AuthTimeout),
            Ok(Err(e)) => return Err(map_device_error(e)),
            Ok(Ok(t)) => t,
        };

        let token = Token::new(
            token_response.access_token().secret().to_string(),
            token_response.expires_in().map(|d| d.as_secs()),
            TokenMode::Delegated,
        );
        *cache = Some(token.clone());
        tracing::info!("Sign-in successful");
        Ok(token)
    }
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn acquire(&self, mode: TokenMode) -> Result<Token> {
        match mode {
            TokenMode::Application => self.acquire_app_token().await,
            TokenMode::Delegated => self.acquire_delegated_token().await,
        }
    }

    async fn invalidate(&self, mode: TokenMode) {
        // application tokens are never cached, nothing to drop there
        if mode == TokenMode::Delegated {
            tracing::debug!("dropping cached delegated token");
            *self.delegated_cache.lock().await = None;
        }
    }
}

fn parse_token_response(body: &str, mode: TokenMode) -> Result<Token> {
    let parsed: TokenEndpointResponse = serde_json::from_str(body).map_err(|e| {
        WatchError::Auth(format!("token endpoint response was not understood: {e}"))
    })?;
    Ok(Token::new(parsed.access_token, parsed.expires_in, mode))
}

/// Distinguish the two operator-facing device-flow outcomes from generic
/// endpoint failures.
fn map_device_error<RE>(err: RequestTokenError<RE, DeviceCodeErrorResponse>) -> WatchError
where
    RE: std::error::Error + 'static,
{
    match &err {
        RequestTokenError::ServerResponse(resp) => match resp.error() {
            DeviceCodeErrorResponseType::AccessDenied => WatchError::AuthDenied,
            DeviceCodeErrorResponseType::ExpiredToken => WatchError::AuthTimeout,
            _ => WatchError::Auth(format!("device flow failed: {err}")),
        },
        _ => WatchError::Auth(format!("device flow failed: {err}")),
    }
}
