//! Thin authenticated client for the Microsoft Graph API
//!
//! No retry policy lives here; callers that want a fresh-token retry on 401
//! (SubscriptionManager does) implement it themselves.

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::Token;
use crate::error::{Result, WatchError};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// RPC facade over Graph. A trait so the subscription manager and the tests
/// can substitute a recording transport.
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// GET a resource path (leading slash included) and return the JSON body.
    async fn get(&self, path: &str, token: &Token) -> Result<Value>;
    /// POST a JSON body to a path and return the JSON response.
    async fn post(&self, path: &str, token: &Token, body: &Value) -> Result<Value>;
}

/// Live Graph client over reqwest.
pub struct GraphClient {
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for GraphClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn get(&self, path: &str, token: &Token) -> Result<Value> {
        let url = format!("{}{}", GRAPH_BASE, path);
        tracing::debug!("Graph GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        check_response(resp).await
    }

    async fn post(&self, path: &str, token: &Token, body: &Value) -> Result<Value> {
        let url = format!("{}{}", GRAPH_BASE, path);
        tracing::debug!("Graph POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token.access_token)
            .json(body)
            .send()
            .await?;
        check_response(resp).await
    }
}

async fn check_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(WatchError::Upstream {
            status: status.as_u16(),
            body,
        });
    }
    resp.json().await.map_err(WatchError::Transport)
}
