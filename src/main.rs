//! teams-watch - Microsoft Graph change-notification watcher
//!
//! Registers a subscription for Teams channel messages, keeps it renewed,
//! and runs the webhook endpoint Graph delivers notifications to.

mod api;
mod auth;
mod config;
mod error;
mod subscription;
mod webhook;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{GraphApi, GraphClient};
use auth::{TokenMode, TokenProvider, TokenSource};
use config::Settings;
use subscription::SubscriptionManager;
use webhook::{LogSink, NotificationSink, ResolvingSink, WebhookReceiver};

#[derive(Parser)]
#[command(name = "teams-watch")]
#[command(about = "Watch a Teams channel through Graph change notifications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook receiver and keep the subscription renewed
    Serve {
        /// Only run the receiver; skip subscription creation and renewal
        #[arg(long)]
        no_subscribe: bool,

        /// Create the subscription with an application token instead of the
        /// delegated device-code flow
        #[arg(long)]
        app_auth: bool,

        /// Fetch the full changed resource for every notification
        #[arg(long)]
        resolve: bool,
    },

    /// Create the subscription once and exit (the receiver must already be
    /// reachable at PUBLIC_URL for the validation handshake)
    Subscribe {
        /// Use an application token instead of the device-code flow
        #[arg(long)]
        app_auth: bool,
    },

    /// Fetch a Graph resource with an application token
    Fetch {
        /// Resource path, e.g. teams/{team-id}/channels/{channel-id}/messages/{message-id}
        resource_path: String,
    },
}

fn auth_mode(app_auth: bool) -> TokenMode {
    if app_auth {
        TokenMode::Application
    } else {
        TokenMode::Delegated
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Serve {
            no_subscribe,
            app_auth,
            resolve,
        } => {
            serve(settings, no_subscribe, app_auth, resolve).await?;
        }
        Commands::Subscribe { app_auth } => {
            subscribe(settings, app_auth).await?;
        }
        Commands::Fetch { resource_path } => {
            fetch(settings, &resource_path).await?;
        }
    }

    Ok(())
}

async fn serve(settings: Settings, no_subscribe: bool, app_auth: bool, resolve: bool) -> Result<()> {
    let tokens: Arc<dyn TokenSource> = Arc::new(TokenProvider::new(&settings));
    let graph: Arc<dyn GraphApi> = Arc::new(GraphClient::new());

    let sink: Arc<dyn NotificationSink> = if resolve {
        Arc::new(ResolvingSink::new(graph.clone(), tokens.clone()))
    } else {
        Arc::new(LogSink)
    };
    let receiver = Arc::new(WebhookReceiver::new(settings.client_state.clone(), sink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Listener first: Graph validates the callback URL during creation.
    let listener = webhook::bind(settings.bind_addr).await?;
    let server = tokio::spawn(webhook::serve(listener, receiver, shutdown_rx.clone()));

    let manager = if no_subscribe {
        None
    } else {
        let manager = Arc::new(SubscriptionManager::new(
            graph,
            tokens,
            &settings,
            auth_mode(app_auth),
        ));
        // The device-code flow can block on the operator for minutes; the
        // receiver is already serving while this waits.
        if let Err(e) = manager.create_subscription().await {
            tracing::error!("initial subscription attempt failed, will retry: {e}");
        }
        tokio::spawn(manager.clone().run_renewal_loop(shutdown_rx));
        Some(manager)
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    if let Some(manager) = manager {
        manager.stop().await;
    }
    let _ = shutdown_tx.send(true);
    server.await??;

    Ok(())
}

async fn subscribe(settings: Settings, app_auth: bool) -> Result<()> {
    let tokens: Arc<dyn TokenSource> = Arc::new(TokenProvider::new(&settings));
    let graph: Arc<dyn GraphApi> = Arc::new(GraphClient::new());
    let manager = SubscriptionManager::new(graph, tokens, &settings, auth_mode(app_auth));

    let sub = manager.create_subscription().await?;
    println!();
    println!("Subscription created!");
    println!("ID:       {}", sub.id);
    println!("Resource: {}", sub.resource);
    println!("Expires:  {}", sub.expiration);

    Ok(())
}

async fn fetch(settings: Settings, resource_path: &str) -> Result<()> {
    let tokens = TokenProvider::new(&settings);
    let graph = GraphClient::new();

    let json = api::fetch_resource(&graph, &tokens, resource_path).await?;
    println!("{}", serde_json::to_string_pretty(&json)?);

    Ok(())
}
