//! Shipped notification sinks

use std::sync::Arc;

use async_trait::async_trait;

use super::receiver::NotificationSink;
use crate::api::{self, GraphApi};
use crate::auth::TokenSource;

/// Logs each change. The default sink for `serve`.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn handle(&self, change_type: &str, resource: &str) -> anyhow::Result<()> {
        tracing::info!("notification: changeType={} resource={}", change_type, resource);
        Ok(())
    }
}

/// Fetches the full changed resource from Graph in a detached task, so the
/// HTTP acknowledgement never waits on the lookup.
pub struct ResolvingSink {
    graph: Arc<dyn GraphApi>,
    tokens: Arc<dyn TokenSource>,
}

impl ResolvingSink {
    pub fn new(graph: Arc<dyn GraphApi>, tokens: Arc<dyn TokenSource>) -> Self {
        Self { graph, tokens }
    }
}

#[async_trait]
impl NotificationSink for ResolvingSink {
    async fn handle(&self, change_type: &str, resource: &str) -> anyhow::Result<()> {
        tracing::info!("notification: changeType={} resource={}", change_type, resource);

        let graph = self.graph.clone();
        let tokens = self.tokens.clone();
        let resource = resource.to_string();
        tokio::spawn(async move {
            match api::fetch_resource(graph.as_ref(), tokens.as_ref(), &resource).await {
                Ok(json) => {
                    tracing::info!(
                        "resolved {}: {}",
                        resource,
                        serde_json::to_string_pretty(&json).unwrap_or_default()
                    );
                }
                Err(e) => {
                    tracing::warn!("could not resolve {}: {e}", resource);
                }
            }
        });
        Ok(())
    }
}
