use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Tier;
use crate::error::{Error, ErrorDetails};

const MIN_PASSWORD_LEN: usize = 6;

// Hash before storage so a leaked session table doesn't leak usable tokens.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"verdant-");
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Minimal credential storage for an edge function; a real identity provider
// sits behind this surface in production.
fn hash_password(password: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"verdant-pw-");
    hasher.update(password.expose_secret().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Authenticated session state, keyed by hashed bearer token. The tier here
/// is the authoritative subscription state the quota engine trusts — never
/// the client-supplied header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub tier: Tier,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    password_hash: String,
    tier: Tier,
}

/// A freshly issued bearer token with its session metadata.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub user_id: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default)]
pub struct Auth {
    // email -> account
    accounts: Arc<DashMap<String, Account>>,
    // hashed token -> session
    sessions: Arc<DashMap<String, Session>>,
}

impl Auth {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_credentials(email: &str, password: &SecretString) -> Result<(), Error> {
        if !email.contains('@') {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: "Invalid email address".to_string(),
            }));
        }
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            }));
        }
        Ok(())
    }

    pub fn signup(&self, email: &str, password: &SecretString) -> Result<IssuedToken, Error> {
        Self::validate_credentials(email, password)?;

        if self.accounts.contains_key(email) {
            return Err(Error::new(ErrorDetails::AccountExists {
                email: email.to_string(),
            }));
        }

        let account = Account {
            user_id: format!("user_{}", Uuid::now_v7().simple()),
            password_hash: hash_password(password),
            tier: Tier::Free,
        };
        let issued = self.issue(email, &account);
        self.accounts.insert(email.to_string(), account);
        Ok(issued)
    }

    pub fn login(&self, email: &str, password: &SecretString) -> Result<IssuedToken, Error> {
        Self::validate_credentials(email, password)?;

        let account = self
            .accounts
            .get(email)
            .ok_or_else(|| Error::new(ErrorDetails::InvalidCredentials))?;
        if account.password_hash != hash_password(password) {
            return Err(Error::new(ErrorDetails::InvalidCredentials));
        }
        Ok(self.issue(email, &account))
    }

    fn issue(&self, email: &str, account: &Account) -> IssuedToken {
        let token = format!("vd_{}", Uuid::now_v7().simple());
        let session = Session {
            user_id: account.user_id.clone(),
            email: email.to_string(),
            tier: account.tier,
            issued_at: Utc::now(),
        };
        self.sessions.insert(hash_token(&token), session);
        IssuedToken {
            token,
            user_id: account.user_id.clone(),
            tier: account.tier,
        }
    }

    pub fn session_for_token(&self, token: &str) -> Option<Session> {
        self.sessions.get(&hash_token(token)).map(|s| s.clone())
    }

    pub fn revoke(&self, token: &str) {
        self.sessions.remove(&hash_token(token));
    }

    /// Update subscription state for an account and all of its live
    /// sessions. Called when a checkout completes (or from tests).
    pub fn set_tier(&self, email: &str, tier: Tier) -> bool {
        let Some(mut account) = self.accounts.get_mut(email) else {
            return false;
        };
        account.tier = tier;
        drop(account);

        for mut entry in self.sessions.iter_mut() {
            if entry.email == email {
                entry.tier = tier;
            }
        }
        true
    }
}

/// Extract a bearer token from an `authorization` header value.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|s| s.strip_prefix("Bearer "))
}
