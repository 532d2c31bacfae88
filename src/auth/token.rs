//! Bearer token representation

use std::time::{SystemTime, UNIX_EPOCH};

/// Default lifetime assumed when the provider omits an expiry hint.
const FALLBACK_LIFETIME_SECS: u64 = 600;

/// Credential mode a token was acquired under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    /// Client-credentials grant (daemon identity).
    Application,
    /// Device-code grant (signed-in user).
    Delegated,
}

/// Access token with its absolute expiry. Held in memory only, never
/// persisted; stale tokens are re-acquired rather than refreshed in place.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: u64,
    pub mode: TokenMode,
}

impl Token {
    pub fn new(access_token: String, expires_in_secs: Option<u64>, mode: TokenMode) -> Self {
        let expires_at = now_secs() + expires_in_secs.unwrap_or(FALLBACK_LIFETIME_SECS);
        Self {
            access_token,
            expires_at,
            mode,
        }
    }

    /// Consider expired if less than 5 minutes remaining, so a token handed
    /// out here is still valid for the duration of the request it backs.
    pub fn is_expired(&self) -> bool {
        now_secs() + 300 >= self.expires_at
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_expired() {
        let token = Token::new("tok".into(), Some(3600), TokenMode::Application);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_short_lived_token_expired_within_margin() {
        // 100s remaining is inside the 5-minute safety margin
        let token = Token::new("tok".into(), Some(100), TokenMode::Application);
        assert!(token.is_expired());
    }

    #[test]
    fn test_missing_expiry_uses_conservative_fallback() {
        let token = Token::new("tok".into(), None, TokenMode::Delegated);
        let lifetime = token.expires_at - now_secs();
        assert!(lifetime <= FALLBACK_LIFETIME_SECS);
        assert!(lifetime > FALLBACK_LIFETIME_SECS - 5);
    }
}
