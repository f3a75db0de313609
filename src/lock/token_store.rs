//! One-time tokens guarding the command and push channels.
//!
//! Tokens are short random nonces, not secrets. A token is consumed the
//! first time anyone asks about it, valid or not, and expires once it is
//! older than the configured timeout. Timestamps come from the tokio clock so
//! paused test runtimes control expiry.

use log::debug;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const TOKEN_LEN: usize = 8;

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub created: Instant,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

pub struct TokenStore {
    tokens: HashMap<String, Instant>,
    timeout: Duration,
}

impl TokenStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tokens: HashMap::new(),
            timeout,
        }
    }

    /// Whether inbound requests must present a token at all.
    pub fn validation_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    pub fn issue(&mut self) -> Token {
        self.prune();
        let now = Instant::now();
        let value = loop {
            let candidate = random_token();
            if !self.tokens.contains_key(&candidate) {
                break candidate;
            }
        };
        self.tokens.insert(value.clone(), now);
        debug!("[Token] Issued {} ({} outstanding)", value, self.tokens.len());
        Token {
            value,
            created: now,
        }
    }

    /// Check a token and remove it whatever the outcome.
    ///
    /// Quote characters are stripped first since some device firmwares send
    /// the token quoted.
    pub fn validate_and_consume(&mut self, token: &str) -> bool {
        self.prune();
        let token: String = token.chars().filter(|c| *c != '"' && *c != '\'').collect();
        let created = self.tokens.remove(&token);
        debug!(
            "[Token] Checking '{}' (known: {}, {} outstanding)",
            token,
            created.is_some(),
            self.tokens.len()
        );
        self.prune();
        match created {
            Some(created) => created.elapsed() <= self.timeout,
            None => false,
        }
    }

    /// Drop every token older than the timeout.
    pub fn prune(&mut self) {
        let timeout = self.timeout;
        self.tokens.retain(|_, created| created.elapsed() <= timeout);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
