//! HTTP surface for the webhook receiver
//!
//! One route does everything Graph needs: the validation handshake answers
//! with the token verbatim, notification POSTs are always acknowledged with
//! 202 (a 5xx here would get the subscription disabled for repeated
//! delivery failures), and anything else gets a permissive 200.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::watch;

use super::receiver::WebhookReceiver;

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

pub fn router(receiver: Arc<WebhookReceiver>) -> Router {
    Router::new()
        .route("/webhook", get(webhook).post(webhook))
        .with_state(receiver)
}

async fn webhook(
    State(receiver): State<Arc<WebhookReceiver>>,
    method: Method,
    Query(query): Query<HandshakeQuery>,
    body: Bytes,
) -> Response {
    // Liveness check Graph performs at subscription creation/renewal. Echo
    // the token as plain text and do nothing else.
    if let Some(token) = query.validation_token {
        tracing::info!("validation handshake from Graph");
        return ([(header::CONTENT_TYPE, "text/plain")], token).into_response();
    }

    if method == Method::POST {
        let dispatched = receiver.process(&body).await;
        tracing::debug!("dispatched {} notification(s)", dispatched);
        return StatusCode::ACCEPTED.into_response();
    }

    StatusCode::OK.into_response()
}

/// Bind the listener separately from running it, so callers can guarantee
/// the endpoint is reachable before registering the subscription (Graph
/// performs the validation handshake during creation).
pub async fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {}", addr))?;
    tracing::info!("webhook receiver listening on {}", addr);
    Ok(listener)
}

/// Run the receiver until the shutdown channel fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    receiver: Arc<WebhookReceiver>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, router(receiver))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("webhook server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::receiver::NotificationSink;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    struct RecordingSink {
        calls: AtomicUsize,
        resources: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                resources: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn handle(&self, _change_type: &str, resource: &str) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.resources.lock().await.push(resource.to_string());
            Ok(())
        }
    }

    fn app(sink: Arc<RecordingSink>) -> Router {
        router(Arc::new(WebhookReceiver::new("s3cr3t".into(), sink)))
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_echoes_token_as_plain_text() {
        let resp = app(RecordingSink::new())
            .oneshot(
                Request::builder()
                    .uri("/webhook?validationToken=abc%20123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/plain"
        );
        assert_eq!(body_string(resp).await, "abc 123");
    }

    #[tokio::test]
    async fn test_handshake_on_post_ignores_body() {
        let sink = RecordingSink::new();
        let resp = app(sink.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook?validationToken=tok")
                    .body(Body::from(
                        r#"{"value":[{"changeType":"created","resource":"r","clientState":"s3cr3t"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "tok");
        // handshake performs no notification processing
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notification_batch_dispatches_trusted_entries_only() {
        let sink = RecordingSink::new();
        let resp = app(sink.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"value":[
                            {"changeType":"created","resource":"teams/T/channels/C/messages/1","clientState":"s3cr3t"},
                            {"changeType":"updated","resource":"x","clientState":"wrong"}
                        ]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_string(resp).await, "");
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *sink.resources.lock().await,
            vec!["teams/T/channels/C/messages/1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_and_malformed_bodies_are_acknowledged() {
        for body in ["", "{", r#"{"value":[]}"#] {
            let resp = app(RecordingSink::new())
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/webhook")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::ACCEPTED, "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn test_bare_get_returns_permissive_200() {
        let resp = app(RecordingSink::new())
            .oneshot(
                Request::builder()
                    .uri("/webhook")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "");
    }
}
