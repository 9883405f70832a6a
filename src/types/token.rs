//! Token Types
//!
//! Issued token responses and the cached token record.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Stable digest of a token's opaque material, used as its cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of raw token material (SHA-256, base64url).
    pub fn of(token_material: &[u8]) -> Self {
        let digest = Sha256::digest(token_material);
        Self(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
    }

    /// Wrap an already computed fingerprint, e.g. one read from a revocation list.
    pub fn from_encoded(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Token response from the authorization server.
///
/// Kept whole so the deployer can forward it to the resource server.
#[derive(Clone, Serialize, Deserialize)]
pub struct IssuanceResponse {
    /// Opaque token material.
    pub access_token: String,
    /// Confirmed (possibly narrower) scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Proof-of-possession confirmation claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnf: Option<serde_json::Value>,
    /// Absolute expiration time, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Lifetime relative to issuance, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exi: Option<u64>,
    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl IssuanceResponse {
    /// Create a response carrying only token material.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            scope: None,
            cnf: None,
            exp: None,
            exi: None,
            expires_in: None,
            extra: HashMap::new(),
        }
    }

    /// Whether the response binds the token to a new security context.
    pub fn has_confirmation(&self) -> bool {
        self.cnf.is_some()
    }

    /// Fingerprint of the token material.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.access_token.as_bytes())
    }

    /// Estimated remaining lifetime from the issuer's hints, if any.
    ///
    /// Precedence is `exp` (relative to `now_unix`), then `exi`, then
    /// `expires_in`. An `exp` already in the past is ignored.
    pub fn lifetime_hint(&self, now_unix: i64) -> Option<Duration> {
        if let Some(exp) = self.exp {
            if exp > now_unix {
                return Some(Duration::from_secs((exp - now_unix) as u64));
            }
        }
        self.exi
            .or(self.expires_in)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl fmt::Debug for IssuanceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuanceResponse")
            .field("access_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("cnf", &self.cnf.as_ref().map(|_| "[PRESENT]"))
            .field("exp", &self.exp)
            .field("exi", &self.exi)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A cached token, owned by the token store once inserted.
#[derive(Clone, Debug)]
pub struct TokenRecord {
    pub fingerprint: Fingerprint,
    pub audience: String,
    /// Granted scope, space-separated action-resource pairs.
    pub scope: String,
    pub response: IssuanceResponse,
    pub posted: bool,
    pub expires_at: Instant,
}

impl TokenRecord {
    /// Build an unposted record for a fresh issuance.
    pub fn new(
        audience: impl Into<String>,
        scope: impl Into<String>,
        response: IssuanceResponse,
        expires_at: Instant,
    ) -> Self {
        Self {
            fingerprint: response.fingerprint(),
            audience: audience.into(),
            scope: scope.into(),
            response,
            posted: false,
            expires_at,
        }
    }

    /// Permissive cache match: stored scope and audience contain the request.
    pub fn satisfies(&self, audience: &str, scope: &str) -> bool {
        self.scope.contains(scope) && self.audience.contains(audience)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Resource names granted by the scope, in scope order.
    pub fn resources(&self) -> Vec<String> {
        resources_from_scope(&self.scope)
    }
}

/// Derive resource names from a scope string.
///
/// Each whitespace-separated `action_resource` pair yields the text after its
/// first underscore; a pair without one yields itself.
pub fn resources_from_scope(scope: &str) -> Vec<String> {
    scope
        .split_whitespace()
        .map(|pair| match pair.split_once('_') {
            Some((_, resource)) => resource.to_string(),
            None => pair.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuance_response_parsing() {
        let json = r#"{
            "access_token": "opaque-token",
            "scope": "r_temp",
            "cnf": {"osc": {"id": "AQ"}},
            "exi": 120,
            "ace_profile": "coap_oscore"
        }"#;

        let response: IssuanceResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "opaque-token");
        assert_eq!(response.scope, Some("r_temp".to_string()));
        assert!(response.has_confirmation());
        assert_eq!(response.exi, Some(120));
        assert!(response.extra.contains_key("ace_profile"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = Fingerprint::of(b"token-a");
        assert_eq!(a, Fingerprint::of(b"token-a"));
        assert_ne!(a, Fingerprint::of(b"token-b"));
        assert!(!a.as_str().contains('='));
    }

    #[test]
    fn test_lifetime_hint_precedence() {
        let now = 1_700_000_000;
        let mut response = IssuanceResponse::new("t");
        assert_eq!(response.lifetime_hint(now), None);

        response.expires_in = Some(90);
        assert_eq!(response.lifetime_hint(now), Some(Duration::from_secs(90)));

        response.exi = Some(60);
        assert_eq!(response.lifetime_hint(now), Some(Duration::from_secs(60)));

        response.exp = Some(now + 30);
        assert_eq!(response.lifetime_hint(now), Some(Duration::from_secs(30)));

        // A stale exp falls through to the relative hints.
        response.exp = Some(now - 5);
        assert_eq!(response.lifetime_hint(now), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_resources_from_scope() {
        assert_eq!(
            resources_from_scope("r_temp r_helloWorld"),
            vec!["temp", "helloWorld"]
        );
        assert_eq!(resources_from_scope("rw_lock_state"), vec!["lock_state"]);
        assert_eq!(resources_from_scope("plain"), vec!["plain"]);
        assert!(resources_from_scope("   ").is_empty());
    }

    #[test]
    fn test_permissive_match() {
        let record = TokenRecord::new(
            "rs1",
            "r_temp r_helloWorld",
            IssuanceResponse::new("t"),
            Instant::now(),
        );
        assert!(record.satisfies("rs1", "r_temp"));
        assert!(record.satisfies("rs", "r_helloWorld"));
        assert!(!record.satisfies("rs2", "r_temp"));
        assert!(!record.satisfies("rs1", "w_temp"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let response = IssuanceResponse::new("super-secret");
        assert!(!format!("{:?}", response).contains("super-secret"));
    }
}
