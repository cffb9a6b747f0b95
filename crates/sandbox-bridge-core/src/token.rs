//! Single-use, time-limited connection tokens.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use tokio::time::Instant;

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy)]
struct ConnectionToken {
    created_at: Instant,
    used: bool,
}

/// Issues and validates connection tokens.
///
/// A token authorizes exactly one transport upgrade. Expired and consumed
/// tokens are swept on every validation attempt.
pub struct TokenStore {
    tokens: Mutex<HashMap<String, ConnectionToken>>,
    ttl: Duration,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl TokenStore {
    /// Create a store whose tokens live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);

        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).insert(
            value.clone(),
            ConnectionToken {
                created_at: Instant::now(),
                used: false,
            },
        );
        tracing::debug!("Issued connection token");
        value
    }

    /// Check `token` and mark it used in one step.
    ///
    /// Returns `true` at most once per issued token. Unknown, consumed and
    /// expired tokens all yield `false`.
    pub fn validate_and_consume(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let ttl = self.ttl;
        tokens.retain(|_, t| !t.used && now.duration_since(t.created_at) <= ttl);

        match tokens.get_mut(token) {
            Some(entry) if !entry.used => {
                entry.used = true;
                true
            }
            _ => false,
        }
    }

    /// Number of tokens currently held, swept or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_single_use() {
        let store = TokenStore::default();
        let token = store.issue();
        assert!(store.validate_and_consume(&token));
        assert!(!store.validate_and_consume(&token));
        assert!(!store.validate_and_consume(&token));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let store = TokenStore::default();
        store.issue();
        assert!(!store.validate_and_consume("not-a-token"));
        assert!(!store.validate_and_consume(""));
    }

    #[test]
    fn test_tokens_are_distinct_and_url_safe() {
        let store = TokenStore::default();
        let a = store.issue();
        let b = store.issue();
        assert_ne!(a, b);
        assert!(a.len() >= 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // Consuming one leaves the other valid.
        assert!(store.validate_and_consume(&a));
        assert!(store.validate_and_consume(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_rejected() {
        let store = TokenStore::new(Duration::from_secs(60));
        let token = store.issue();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.validate_and_consume(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_expired_regardless_of_presented_token() {
        let store = TokenStore::new(Duration::from_secs(60));
        store.issue();
        store.issue();
        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = store.issue();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.len(), 3);

        assert!(!store.validate_and_consume("unrelated"));
        assert_eq!(store.len(), 1);
        assert!(store.validate_and_consume(&fresh));
    }

    #[test]
    fn test_consumed_token_swept_on_next_validation() {
        let store = TokenStore::default();
        let token = store.issue();
        assert!(store.validate_and_consume(&token));
        assert_eq!(store.len(), 1);
        assert!(!store.validate_and_consume("other"));
        assert!(store.is_empty());
    }
}
