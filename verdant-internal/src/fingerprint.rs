use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// How much of the user-agent participates in the fingerprint. Full UA
/// strings churn with every app update and would split one client across
/// many records.
const USER_AGENT_PREFIX_LEN: usize = 32;

/// Best-effort bucketing key for a requester: client-declared user id,
/// network address, and a truncated user-agent, hashed together.
///
/// Not a security credential — a motivated caller can mint fresh
/// fingerprints at will. It only has to be stable enough that normal clients
/// land in the same bucket across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_id = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or("anonymous");

        // Behind a proxy the client address is the first entry of the
        // forwarded chain.
        let addr = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .unwrap_or("unknown");

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        Self::derive(user_id, addr, user_agent)
    }

    pub fn derive(user_id: &str, addr: &str, user_agent: &str) -> Self {
        let truncated_ua: String = user_agent.chars().take(USER_AGENT_PREFIX_LEN).collect();

        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b"|");
        hasher.update(addr.as_bytes());
        hasher.update(b"|");
        hasher.update(truncated_ua.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_key(&self) -> &str {
        &self.0
    }
}
