//! Object store delegate.
//!
//! Video bytes never pass through this server. Uploads and playback go
//! straight to the object store with a time-limited grant; this module only
//! issues the grant by signing `method + key + expiry` with a shared secret.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct Signer {
    base_url: String,
    key: Vec<u8>,
}

impl Signer {
    pub fn new(base_url: &str, signing_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key: signing_key.as_bytes().to_vec(),
        }
    }

    pub fn presign_get(&self, storage_key: &str, ttl_secs: i64) -> String {
        self.presign("GET", storage_key, ttl_secs)
    }

    pub fn presign_put(&self, storage_key: &str, ttl_secs: i64) -> String {
        self.presign("PUT", storage_key, ttl_secs)
    }

    fn presign(&self, method: &str, storage_key: &str, ttl_secs: i64) -> String {
        let expires = Utc::now().timestamp() + ttl_secs;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(format!("{method}\n{storage_key}\n{expires}").as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        format!(
            "{}/{storage_key}?method={method}&expires={expires}&signature={signature}",
            self.base_url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Signer;

    #[test]
    fn grants_embed_expiry_and_signature() {
        let signer = Signer::new("http://store.local/bucket/", "secret");

        let url = signer.presign_get("videos/42.mp4", 600);

        assert!(url.starts_with("http://store.local/bucket/videos/42.mp4?"));
        assert!(url.contains("method=GET"));
        assert!(url.contains("expires="));
        assert!(url.contains("signature="));
    }

    #[test]
    fn upload_and_playback_grants_differ() {
        let signer = Signer::new("http://store.local", "secret");

        let get = signer.presign_get("videos/1.mp4", 600);
        let put = signer.presign_put("videos/1.mp4", 600);

        assert_ne!(get, put);
    }
}
