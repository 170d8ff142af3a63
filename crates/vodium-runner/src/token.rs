//! Job tokens and signed resource references.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use vodium_models::SignedFileRef;

type HmacSha256 = Hmac<Sha256>;

/// Default validity window for signed input references (15 minutes).
pub const DEFAULT_RESOURCE_TTL_SECS: u64 = 900;

/// Cap on the validity window (7 days) to bound leaked-reference damage.
pub const MAX_RESOURCE_TTL_SECS: u64 = 604_800;

/// Issue a fresh single-use job token. One token is valid per lease
/// generation; every exit from `Processing` rotates it.
pub fn generate_job_token() -> String {
    format!("vjt-{}", Uuid::new_v4())
}

/// Signs server-side file paths into time-scoped fetch URLs.
///
/// Runners receive these instead of raw paths: the URL proves nothing
/// beyond "fetch this one resource until the expiry", so a runner never
/// holds standing filesystem or network access.
#[derive(Debug, Clone)]
pub struct ResourceSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl ResourceSigner {
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            secret: secret.into(),
            base_url,
        }
    }

    /// Sign a path into a fetchable reference valid for `ttl` (capped).
    pub fn sign(&self, path: &str, ttl: Duration) -> SignedFileRef {
        let ttl = ttl.min(Duration::from_secs(MAX_RESOURCE_TTL_SECS));
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let exp = expires_at.timestamp();
        let sig = self.signature(path, exp);
        let url = format!(
            "{}/files/{}?exp={}&sig={}",
            self.base_url,
            path.trim_start_matches('/'),
            exp,
            sig
        );
        SignedFileRef { url, expires_at }
    }

    /// Verify a (path, expiry, signature) triple from an incoming fetch.
    pub fn verify(&self, path: &str, exp: i64, sig: &str) -> bool {
        if Utc::now().timestamp() >= exp {
            return false;
        }
        let expected = self.signature(path, exp);
        // equal-length compare keeps the check cheap and shape-stable
        expected.len() == sig.len()
            && expected
                .bytes()
                .zip(sig.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    fn signature(&self, path: &str, exp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(path.trim_start_matches('/').as_bytes());
        mac.update(b"\n");
        mac.update(&exp.to_be_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
