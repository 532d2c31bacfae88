//! Graph change-notification subscription state machine
//!
//! One subscription is tracked per process. Renewal is re-creation: Graph
//! channel-message subscriptions are short-lived, so rather than PATCHing
//! the existing registration we request a fresh one with the same
//! clientState and notificationUrl and swap it in atomically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::api::GraphApi;
use crate::auth::{TokenMode, TokenSource};
use crate::config::Settings;
use crate::error::{Result, WatchError};

/// Deletions are not watched; a deleted message is not actionable here.
const CHANGE_TYPES: &str = "created,updated";

/// How long the renewal loop waits before retrying a failed registration.
const FAILED_RETRY: Duration = Duration::from_secs(60);

/// The locally tracked registration with the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Opaque id assigned by Graph.
    pub id: String,
    pub resource: String,
    pub notification_url: String,
    pub client_state: String,
    pub expiration: DateTime<Utc>,
}

/// Lifecycle states. `Failed` is retryable; `Terminated` is not.
#[derive(Debug, Clone)]
pub enum SubscriptionState {
    Unregistered,
    Active(Subscription),
    Failed,
    Terminated,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSubscription {
    id: String,
    expiration_date_time: String,
}

/// Owns the single subscription and serializes every mutation of it.
///
/// All operations take the internal state lock for their full duration, so
/// overlapping renewal triggers cannot register duplicate subscriptions.
pub struct SubscriptionManager {
    graph: Arc<dyn GraphApi>,
    tokens: Arc<dyn TokenSource>,
    mode: TokenMode,
    resource: String,
    notification_url: String,
    client_state: String,
    lifetime: Duration,
    lead: Duration,
    state: Mutex<SubscriptionState>,
}

impl SubscriptionManager {
    pub fn new(
        graph: Arc<dyn GraphApi>,
        tokens: Arc<dyn TokenSource>,
        settings: &Settings,
        mode: TokenMode,
    ) -> Self {
        Self {
            graph,
            tokens,
            mode,
            resource: settings.resource_path(),
            notification_url: settings.notification_url(),
            client_state: settings.client_state.clone(),
            lifetime: settings.subscription_lifetime,
            lead: settings.renewal_lead,
            state: Mutex::new(SubscriptionState::Unregistered),
        }
    }

    pub async fn state(&self) -> SubscriptionState {
        self.state.lock().await.clone()
    }

    /// Register the subscription with Graph. On success the new registration
    /// replaces whatever was tracked before; on failure the state moves to
    /// `Failed` (retryable).
    pub async fn create_subscription(&self) -> Result<Subscription> {
        let mut state = self.state.lock().await;
        if matches!(*state, SubscriptionState::Terminated) {
            return Err(WatchError::Stopped);
        }
        match self.register().await {
            Ok(sub) => {
                tracing::info!(
                    "subscription {} active until {}",
                    sub.id,
                    format_expiration(&sub.expiration)
                );
                *state = SubscriptionState::Active(sub.clone());
                Ok(sub)
            }
            Err(e) => {
                tracing::error!("subscription creation failed: {e}");
                *state = SubscriptionState::Failed;
                Err(e)
            }
        }
    }

    /// Re-create the subscription with a fresh expiry. If registration fails
    /// while the old subscription is still unexpired, the old one is kept
    /// (Graph keeps delivering to it until its own expiry) and the error is
    /// surfaced to the caller.
    pub async fn renew(&self) -> Result<Subscription> {
        let mut state = self.state.lock().await;
        if matches!(*state, SubscriptionState::Terminated) {
            return Err(WatchError::Stopped);
        }
        match self.register().await {
            Ok(sub) => {
                tracing::info!(
                    "subscription renewed: {} (expires {})",
                    sub.id,
                    format_expiration(&sub.expiration)
                );
                *state = SubscriptionState::Active(sub.clone());
                Ok(sub)
            }
            Err(e) => {
                match &*state {
                    SubscriptionState::Active(old) if old.expiration > Utc::now() => {
                        tracing::error!(
                            "renewal failed, keeping {} until {}: {e}",
                            old.id,
                            format_expiration(&old.expiration)
                        );
                    }
                    _ => {
                        tracing::error!("renewal failed: {e}");
                        *state = SubscriptionState::Failed;
                    }
                }
                Err(e)
            }
        }
    }

    /// Stop tracking. No further renewal will run.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        // a remote DELETE /subscriptions/{id} would slot in here if explicit
        // teardown is ever needed
        *state = SubscriptionState::Terminated;
        tracing::info!("subscription tracking stopped");
    }

    /// Single registration round trip. A 401 from Graph gets exactly one
    /// fresh-token retry; any other failure is surfaced as-is.
    async fn register(&self) -> Result<Subscription> {
        let token = self.tokens.acquire(self.mode).await?;
        let expiration = Utc::now()
            + chrono::Duration::from_std(self.lifetime)
                .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let payload = creation_payload(
            &self.resource,
            &self.notification_url,
            &self.client_state,
            expiration,
        );
        tracing::debug!("creating subscription: {}", payload);

        let resp = match self.graph.post("/subscriptions", &token, &payload).await {
            Ok(v) => v,
            Err(e) if e.is_unauthorized() => {
                tracing::info!("Graph rejected the token, re-acquiring and retrying once");
                // the cached token passed its local expiry check but Graph
                // refused it; drop it so the retry carries a fresh credential
                self.tokens.invalidate(self.mode).await;
                let token = self.tokens.acquire(self.mode).await?;
                self.graph.post("/subscriptions", &token, &payload).await?
            }
            Err(e) => return Err(e),
        };

        parse_created(resp, &self.resource, &self.notification_url, &self.client_state)
    }

    /// Background renewal loop: wake at `expiration - lead`, re-create, and
    /// reschedule. Failed registrations are retried on a fixed short delay.
    /// Returns when the shutdown channel fires or the manager is stopped.
    pub async fn run_renewal_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let wait = match self.state().await {
                SubscriptionState::Terminated => return,
                SubscriptionState::Active(sub) => {
                    let lead = chrono::Duration::from_std(self.lead)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    (sub.expiration - lead - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                }
                _ => FAILED_RETRY,
            };
            tracing::debug!("next renewal attempt in {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    tracing::info!("renewal loop stopped");
                    return;
                }
            }

            let result = match self.state().await {
                SubscriptionState::Terminated => return,
                SubscriptionState::Active(_) => self.renew().await,
                _ => self.create_subscription().await,
            };
            if let Err(e) = result {
                tracing::error!("renewal attempt failed: {e}");
            }
        }
    }
}

/// Creation payload per the Graph subscriptions API. `includeResourceData`
/// stays absent (default false), so no encryption certificate is needed.
fn creation_payload(
    resource: &str,
    notification_url: &str,
    client_state: &str,
    expiration: DateTime<Utc>,
) -> Value {
    serde_json::json!({
        "changeType": CHANGE_TYPES,
        "notificationUrl": notification_url,
        "resource": resource,
        "expirationDateTime": format_expiration(&expiration),
        "clientState": client_state,
    })
}

/// Graph requires UTC with second precision and a literal `Z` suffix.
fn format_expiration(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_created(
    resp: Value,
    resource: &str,
    notification_url: &str,
    client_state: &str,
) -> Result<Subscription> {
    let created: CreatedSubscription = serde_json::from_value(resp).map_err(|e| {
        WatchError::Upstream {
            status: 200,
            body: format!("unexpected subscription response: {e}"),
        }
    })?;
    let expiration = DateTime::parse_from_rfc3339(&created.expiration_date_time)
        .map_err(|e| WatchError::Upstream {
            status: 200,
            body: format!("bad expirationDateTime in response: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(Subscription {
        id: created.id,
        resource: resource.to_string(),
        notification_url: notification_url.to_string(),
        client_state: client_state.to_string(),
        expiration,
    })
}
