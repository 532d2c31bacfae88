//! Process configuration, read once from the environment at startup
//!
//! Core components receive a `Settings` reference from their constructors;
//! nothing below `main` reads the environment directly.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// PoC default from the original deployment. Fine for local testing, not for
/// anything reachable from the internet.
pub const DEFAULT_CLIENT_STATE: &str = "superSecretClientState123";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_LIFETIME_MINS: u64 = 30;
const DEFAULT_RENEWAL_LEAD_MINS: u64 = 5;
const DEFAULT_DEVICE_FLOW_TIMEOUT_SECS: u64 = 900;

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Azure AD tenant the app registration lives in.
    pub tenant_id: String,
    /// App registration (client) ID.
    pub client_id: String,
    /// Client secret; only required for application-mode tokens.
    pub client_secret: Option<String>,
    /// Team whose channel is being watched.
    pub team_id: String,
    /// Channel whose messages are being watched.
    pub channel_id: String,
    /// Shared secret echoed back by Graph on every notification.
    pub client_state: String,
    /// Public base URL Graph can reach the receiver at (e.g. an ngrok URL).
    pub public_url: String,
    /// Local address the webhook listener binds.
    pub bind_addr: SocketAddr,
    /// Requested subscription lifetime (kept under the ~1h provider ceiling
    /// for channel messages).
    pub subscription_lifetime: Duration,
    /// How long before expiry the renewal loop wakes.
    pub renewal_lead: Duration,
    /// Upper bound on the device-code sign-in wait.
    pub device_flow_timeout: Duration,
}

impl Settings {
    /// Read and validate all settings from the environment.
    pub fn from_env() -> Result<Self> {
        let client_state = match optional("CLIENT_STATE") {
            Some(s) => s,
            None => {
                tracing::warn!(
                    "CLIENT_STATE not set, using the built-in default -- do not run this \
                     against a publicly reachable endpoint"
                );
                DEFAULT_CLIENT_STATE.to_string()
            }
        };

        let bind_addr: SocketAddr = optional("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        let settings = Self {
            tenant_id: require("TENANT_ID")?,
            client_id: require("CLIENT_ID")?,
            client_secret: optional("CLIENT_SECRET"),
            team_id: require("TEAM_ID")?,
            channel_id: require("CHANNEL_ID")?,
            client_state,
            public_url: require("PUBLIC_URL")?,
            bind_addr,
            subscription_lifetime: mins_env("SUBSCRIPTION_LIFETIME_MINS", DEFAULT_LIFETIME_MINS)?,
            renewal_lead: mins_env("RENEWAL_LEAD_MINS", DEFAULT_RENEWAL_LEAD_MINS)?,
            device_flow_timeout: secs_env(
                "DEVICE_FLOW_TIMEOUT_SECS",
                DEFAULT_DEVICE_FLOW_TIMEOUT_SECS,
            )?,
        };

        if settings.renewal_lead >= settings.subscription_lifetime {
            bail!(
                "RENEWAL_LEAD_MINS must be smaller than SUBSCRIPTION_LIFETIME_MINS \
                 (renewal would fire before the subscription exists)"
            );
        }

        Ok(settings)
    }

    /// Graph resource path for the watched channel's messages.
    pub fn resource_path(&self) -> String {
        format!("/teams/{}/channels/{}/messages", self.team_id, self.channel_id)
    }

    /// Callback URL handed to Graph at subscription creation.
    pub fn notification_url(&self) -> String {
        format!("{}/webhook", self.public_url.trim_end_matches('/'))
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} must be set", name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn mins_env(name: &str, default: u64) -> Result<Duration> {
    match optional(name) {
        Some(v) => parse_mins(name, &v),
        None => Ok(Duration::from_secs(default * 60)),
    }
}

fn parse_mins(name: &str, value: &str) -> Result<Duration> {
    let minutes: u64 = value
        .parse()
        .with_context(|| format!("{} is not a valid number of minutes", name))?;
    let secs = minutes
        .checked_mul(60)
        .with_context(|| format!("{} is unreasonably large", name))?;
    Ok(Duration::from_secs(secs))
}

fn secs_env(name: &str, default: u64) -> Result<Duration> {
    match optional(name) {
        Some(v) => {
            let secs: u64 = v
                .parse()
                .with_context(|| format!("{} is not a valid number of seconds", name))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(Duration::from_secs(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: None,
            team_id: "T1".into(),
            channel_id: "C1".into(),
            client_state: "s3cr3t".into(),
            public_url: "https://example.ngrok.io/".into(),
            bind_addr: "127.0.0.1:5000".parse().unwrap(),
            subscription_lifetime: Duration::from_secs(1800),
            renewal_lead: Duration::from_secs(300),
            device_flow_timeout: Duration::from_secs(900),
        }
    }

    #[test]
    fn test_resource_path() {
        assert_eq!(settings().resource_path(), "/teams/T1/channels/C1/messages");
    }

    #[test]
    fn test_notification_url_trims_trailing_slash() {
        assert_eq!(
            settings().notification_url(),
            "https://example.ngrok.io/webhook"
        );
    }

    #[test]
    fn test_parse_mins() {
        assert_eq!(
            parse_mins("RENEWAL_LEAD_MINS", "5").unwrap(),
            Duration::from_secs(300)
        );
        assert!(parse_mins("RENEWAL_LEAD_MINS", "five").is_err());
    }

    #[test]
    fn test_parse_mins_rejects_overflowing_values() {
        let err = parse_mins("SUBSCRIPTION_LIFETIME_MINS", &u64::MAX.to_string()).unwrap_err();
        assert!(err.to_string().contains("unreasonably large"));
    }
}
