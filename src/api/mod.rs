//! Microsoft Graph API access

pub mod client;

pub use client::{GraphApi, GraphClient};

use serde_json::Value;

use crate::auth::{TokenMode, TokenSource};
use crate::error::Result;

/// Fetch a changed resource (e.g. `teams/{t}/channels/{c}/messages/{m}`)
/// with an application token and return the raw JSON.
pub async fn fetch_resource(
    graph: &dyn GraphApi,
    tokens: &dyn TokenSource,
    resource_path: &str,
) -> Result<Value> {
    let token = tokens.acquire(TokenMode::Application).await?;
    let path = format!("/{}", resource_path.trim_start_matches('/'));
    graph.get(&path, &token).await
}
