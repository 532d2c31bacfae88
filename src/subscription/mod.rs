//! Subscription lifecycle: creation, expiry tracking, proactive renewal

pub mod manager;

pub use manager::{Subscription, SubscriptionManager, SubscriptionState};
