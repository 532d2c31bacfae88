//! Webhook ingestion: validation handshake, notification authentication,
//! deduplication, and dispatch

pub mod receiver;
pub mod server;
pub mod sink;

pub use receiver::{NotificationSink, WebhookReceiver};
pub use server::{bind, serve};
pub use sink::{LogSink, ResolvingSink};
