//! Authentication against Azure AD
//!
//! Two credential modes: client credentials for daemon (application) calls,
//! and the OAuth2 device code flow for delegated calls. Delegated tokens are
//! cached in memory and reused silently while they remain valid.

pub mod provider;
pub mod token;

pub use provider::{TokenProvider, TokenSource};
pub use token::{Token, TokenMode};
