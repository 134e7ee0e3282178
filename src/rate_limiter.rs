//! Download rate limiting with a signed, tamper-evident policy file.
//!
//! The policy blob is XOR-obfuscated JSON signed over its SHA-256 digest
//! with Ed25519. Any verification or I/O failure drops the limiter into a
//! safe-block state where every check fails with a one-hour retry-after —
//! no comment download runs until the files are fixed.
//!
//! Counters are persisted rows so quota usage survives restarts. `check`
//! never increments; `increment` is a separate call issued only after a
//! fetch actually returned a body.

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::constants::{buckets, rate_limit};
use crate::db::Store;
use crate::scrapers::ScraperRegistry;

const XOR_KEY: &[u8] =
    b"T3Nn@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S@pT^K!v8&s$U@w#Z&e3S";

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RateLimitExceeded {
    pub message: String,
    pub retry_after_seconds: u64,
    /// Set when the limiter is safe-blocked: tasks must fail terminally
    /// instead of pausing for a retry that can never succeed.
    pub safe_block: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Match,
    Search,
}

impl FallbackKind {
    #[must_use]
    pub const fn bucket_key(self) -> &'static str {
        match self {
            Self::Match => buckets::FALLBACK_MATCH,
            Self::Search => buckets::FALLBACK_SEARCH,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_limit")]
    global_limit: i32,
    #[serde(default = "default_period")]
    global_period: String,
}

const fn default_enabled() -> bool {
    true
}
const fn default_limit() -> i32 {
    50
}
fn default_period() -> String {
    "hour".to_string()
}

pub struct RateLimiter {
    store: Store,
    registry: Arc<ScraperRegistry>,
    verification_failed: bool,
    enabled: bool,
    global_limit: i32,
    global_period: String,
}

impl RateLimiter {
    /// Load and verify the policy files under `policy_dir`. Missing files,
    /// I/O errors and signature mismatches all enter safe-block; only a
    /// decode failure after a good signature falls back to defaults.
    pub fn new(store: Store, registry: Arc<ScraperRegistry>, policy_dir: &Path) -> Self {
        let mut limiter = Self {
            store,
            registry,
            verification_failed: false,
            enabled: true,
            global_limit: 50,
            global_period: "hour".to_string(),
        };

        match Self::load_policy(policy_dir) {
            Ok(policy) => {
                limiter.enabled = policy.enabled;
                limiter.global_limit = policy.global_limit;
                limiter.global_period = policy.global_period;
                info!(
                    "Rate limit policy verified: enabled={}, limit={}/{}",
                    limiter.enabled, limiter.global_limit, limiter.global_period
                );
            }
            Err(PolicyError::Verification(msg)) => {
                error!("!!! Rate limit policy verification failed: {}", msg);
                error!("!!! All danmaku downloads are blocked until the policy files are restored.");
                limiter.verification_failed = true;
            }
            Err(PolicyError::Decode(msg)) => {
                warn!("Rate limit policy decode failed, using defaults: {}", msg);
            }
        }

        limiter
    }

    fn load_policy(dir: &Path) -> Result<PolicyFile, PolicyError> {
        let blob_path = dir.join("rate_limit.bin");
        let sig_path = dir.join("rate_limit.bin.sig");
        let key_path = dir.join("public_key.pem");

        if !blob_path.exists() || !sig_path.exists() || !key_path.exists() {
            return Err(PolicyError::Verification(
                "policy files incomplete or missing".to_string(),
            ));
        }

        let blob = std::fs::read(&blob_path)
            .map_err(|e| PolicyError::Verification(format!("cannot read policy blob: {e}")))?;
        let signature_b64 = std::fs::read_to_string(&sig_path)
            .map_err(|e| PolicyError::Verification(format!("cannot read signature: {e}")))?;
        let key_pem = std::fs::read_to_string(&key_path)
            .map_err(|e| PolicyError::Verification(format!("cannot read public key: {e}")))?;

        Self::verify_signature(&blob, signature_b64.trim(), &key_pem)?;

        let json_bytes: Vec<u8> = blob
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ XOR_KEY[i % XOR_KEY.len()])
            .collect();

        serde_json::from_slice(&json_bytes)
            .map_err(|e| PolicyError::Decode(format!("policy JSON invalid: {e}")))
    }

    /// The signature covers the ASCII hex digest of the obfuscated blob.
    fn verify_signature(blob: &[u8], signature_b64: &str, key_pem: &str) -> Result<(), PolicyError> {
        let key_bytes = extract_key_from_pem(key_pem)
            .ok_or_else(|| PolicyError::Verification("malformed public key PEM".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| PolicyError::Verification(format!("invalid public key: {e}")))?;

        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| PolicyError::Verification(format!("signature not base64: {e}")))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| PolicyError::Verification("signature length mismatch".to_string()))?;
        let signature = Signature::from_bytes(&sig_array);

        let digest_hex = hex_digest(blob);
        verifying_key
            .verify(digest_hex.as_bytes(), &signature)
            .map_err(|_| {
                PolicyError::Verification(
                    "signature does not match rate_limit.bin, file may be tampered".to_string(),
                )
            })
    }

    #[must_use]
    pub const fn is_safe_blocked(&self) -> bool {
        self.verification_failed
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled && self.global_limit > 0
    }

    #[must_use]
    pub fn period_seconds(&self) -> i64 {
        period_seconds(&self.global_period)
    }

    #[must_use]
    pub const fn global_limit(&self) -> i32 {
        self.global_limit
    }

    #[must_use]
    pub fn global_period(&self) -> &str {
        &self.global_period
    }

    /// Check whether a download against `provider` may proceed. Resets all
    /// counters first when the window elapsed. Does not increment.
    pub async fn check(&self, provider: &str) -> Result<(), RateLimitExceeded> {
        self.ensure_not_blocked()?;

        if !self.is_enabled() {
            return Ok(());
        }

        let period = self.period_seconds();
        let (global_state, elapsed) = self.windowed_state(buckets::GLOBAL, period).await?;

        if global_state.request_count >= self.global_limit {
            let retry = (period - elapsed).max(0) as u64;
            return Err(RateLimitExceeded {
                message: format!(
                    "已达到全局速率限制 ({}/{})",
                    global_state.request_count, self.global_limit
                ),
                retry_after_seconds: retry,
                safe_block: false,
            });
        }

        if let Some(quota) = self.registry.quota(provider) {
            let provider_state = self.read_state(provider).await?;
            if provider_state.request_count >= quota {
                let retry = (period - elapsed).max(0) as u64;
                return Err(RateLimitExceeded {
                    message: format!(
                        "已达到源 '{}' 的特定配额 ({}/{})",
                        provider, provider_state.request_count, quota
                    ),
                    retry_after_seconds: retry,
                    safe_block: false,
                });
            }
        }

        Ok(())
    }

    /// Bump the global and provider buckets. Only call after a successful
    /// fetch with a non-null body.
    pub async fn increment(&self, provider: &str) -> anyhow::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.store
            .rate_limit_increment_pair(buckets::GLOBAL, provider)
            .await
    }

    /// Fallback buckets share one combined cap per window, split across the
    /// match and search kinds.
    pub async fn check_fallback(
        &self,
        kind: FallbackKind,
        _provider: &str,
    ) -> Result<(), RateLimitExceeded> {
        self.ensure_not_blocked()?;

        let period = self.period_seconds();
        let (_, elapsed) = self.windowed_state(buckets::GLOBAL, period).await?;

        let match_state = self.read_state(buckets::FALLBACK_MATCH).await?;
        let search_state = self.read_state(buckets::FALLBACK_SEARCH).await?;
        let total = match_state.request_count + search_state.request_count;

        if total >= rate_limit::FALLBACK_TOTAL_LIMIT {
            let retry = (period - elapsed).max(0) as u64;
            return Err(RateLimitExceeded {
                message: format!(
                    "已达到后备请求总限额 ({}/{}, kind={:?})",
                    total,
                    rate_limit::FALLBACK_TOTAL_LIMIT,
                    kind
                ),
                retry_after_seconds: retry,
                safe_block: false,
            });
        }

        Ok(())
    }

    pub async fn increment_fallback(
        &self,
        kind: FallbackKind,
        provider: &str,
    ) -> anyhow::Result<()> {
        self.store
            .rate_limit_increment_pair(kind.bucket_key(), &fallback_provider_key(provider))
            .await
    }

    /// Snapshot for the status endpoint.
    pub async fn status(&self) -> anyhow::Result<RateLimitStatus> {
        let period = self.period_seconds();
        let states = self.store.rate_limit_states().await?;

        let find = |key: &str| {
            states
                .iter()
                .find(|s| s.bucket_key == key)
                .map_or(0, |s| s.request_count)
        };

        let global_count = find(buckets::GLOBAL);
        let seconds_until_reset = states
            .iter()
            .find(|s| s.bucket_key == buckets::GLOBAL)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s.last_reset_time).ok())
            .map_or(period, |reset| {
                let elapsed = (chrono::Utc::now() - reset.with_timezone(&chrono::Utc)).num_seconds();
                (period - elapsed).max(0)
            });

        let fallback_match = find(buckets::FALLBACK_MATCH);
        let fallback_search = find(buckets::FALLBACK_SEARCH);

        let providers = self
            .registry
            .provider_names()
            .into_iter()
            .map(|name| {
                let direct = find(name);
                let fallback = find(&fallback_provider_key(name));
                ProviderRateStatus {
                    provider_name: name.to_string(),
                    direct_count: direct,
                    fallback_count: fallback,
                    request_count: direct + fallback,
                    quota: self
                        .registry
                        .quota(name)
                        .map_or_else(|| "∞".to_string(), |q| q.to_string()),
                }
            })
            .collect();

        Ok(RateLimitStatus {
            global_enabled: self.is_enabled(),
            global_request_count: global_count,
            global_limit: self.global_limit,
            global_period: self.global_period.clone(),
            seconds_until_reset,
            fallback_total_count: fallback_match + fallback_search,
            fallback_total_limit: rate_limit::FALLBACK_TOTAL_LIMIT,
            fallback_match_count: fallback_match,
            fallback_search_count: fallback_search,
            providers,
        })
    }

    fn ensure_not_blocked(&self) -> Result<(), RateLimitExceeded> {
        if self.verification_failed {
            return Err(RateLimitExceeded {
                message: Self::SAFE_BLOCK_MESSAGE.to_string(),
                retry_after_seconds: rate_limit::SAFE_BLOCK_RETRY_SECONDS,
                safe_block: true,
            });
        }
        Ok(())
    }

    async fn read_state(
        &self,
        key: &str,
    ) -> Result<crate::entities::rate_limit_state::Model, RateLimitExceeded> {
        self.store.rate_limit_state(key).await.map_err(db_error)
    }

    /// Read a bucket, resetting every counter first if the window elapsed.
    /// Returns the (possibly fresh) state and seconds elapsed in the window.
    async fn windowed_state(
        &self,
        key: &str,
        period: i64,
    ) -> Result<(crate::entities::rate_limit_state::Model, i64), RateLimitExceeded> {
        let state = self.read_state(key).await?;
        let last_reset = chrono::DateTime::parse_from_rfc3339(&state.last_reset_time)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        let elapsed = (chrono::Utc::now() - last_reset).num_seconds();
        if elapsed >= period {
            info!("Rate limit window elapsed, resetting all counters");
            self.store.rate_limit_reset_all().await.map_err(db_error)?;
            let fresh = self.read_state(key).await?;
            return Ok((fresh, 0));
        }

        Ok((state, elapsed))
    }
}

enum PolicyError {
    /// Tampering or unreadable files: safe-block.
    Verification(String),
    /// Good signature, bad payload: keep defaults.
    Decode(String),
}

fn db_error(e: anyhow::Error) -> RateLimitExceeded {
    RateLimitExceeded {
        message: format!("rate limit state unavailable: {e}"),
        retry_after_seconds: 60,
        safe_block: false,
    }
}

fn fallback_provider_key(provider: &str) -> String {
    format!("fallback_{provider}")
}

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Strip the PEM armor and take the trailing 32 bytes of the DER body as
/// the raw verifying key.
fn extract_key_from_pem(pem: &str) -> Option<[u8; 32]> {
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    let der = base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .ok()?;
    if der.len() < 32 {
        return None;
    }
    der[der.len() - 32..].try_into().ok()
}

fn period_seconds(period: &str) -> i64 {
    match period {
        "second" => 1,
        "minute" => 60,
        "day" => 86_400,
        _ => 3600,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub global_enabled: bool,
    pub global_request_count: i32,
    pub global_limit: i32,
    pub global_period: String,
    pub seconds_until_reset: i64,
    pub fallback_total_count: i32,
    pub fallback_total_limit: i32,
    pub fallback_match_count: i32,
    pub fallback_search_count: i32,
    pub providers: Vec<ProviderRateStatus>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRateStatus {
    pub provider_name: String,
    pub direct_count: i32,
    pub fallback_count: i32,
    pub request_count: i32,
    /// Provider quota, or `"∞"` when unlimited.
    pub quota: String,
}

impl RateLimiter {
    /// Message surfaced by import tasks while safe-blocked.
    pub const SAFE_BLOCK_MESSAGE: &'static str = "配置验证失败，所有请求已被安全阻止。";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_mapping_defaults_to_hour() {
        assert_eq!(period_seconds("second"), 1);
        assert_eq!(period_seconds("minute"), 60);
        assert_eq!(period_seconds("day"), 86_400);
        assert_eq!(period_seconds("fortnight"), 3600);
    }

    #[test]
    fn xor_deobfuscation_round_trips() {
        let plain = br#"{"enabled":true,"global_limit":5,"global_period":"minute"}"#;
        let obfuscated: Vec<u8> = plain
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ XOR_KEY[i % XOR_KEY.len()])
            .collect();
        let back: Vec<u8> = obfuscated
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ XOR_KEY[i % XOR_KEY.len()])
            .collect();
        assert_eq!(back, plain);

        let policy: PolicyFile = serde_json::from_slice(&back).unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.global_limit, 5);
        assert_eq!(policy.global_period, "minute");
    }

    #[test]
    fn pem_extraction_takes_trailing_key_bytes() {
        use base64::Engine;
        // 12-byte DER prefix followed by a recognizable 32-byte key.
        let mut der = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
        der.extend(std::iter::repeat_n(0xAB, 32));
        let b64 = base64::engine::general_purpose::STANDARD.encode(&der);
        let pem = format!("-----BEGIN PUBLIC KEY-----\n{b64}\n-----END PUBLIC KEY-----\n");

        let key = extract_key_from_pem(&pem).unwrap();
        assert_eq!(key, [0xAB; 32]);
    }

    #[test]
    fn tampered_blob_fails_verification() {
        use ed25519_dalek::{Signer, SigningKey};

        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let blob = b"obfuscated-policy-bytes".to_vec();
        let signature = signing_key.sign(hex_digest(&blob).as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let mut der = vec![0u8; 12];
        der.extend_from_slice(signing_key.verifying_key().as_bytes());
        let key_b64 = base64::engine::general_purpose::STANDARD.encode(&der);
        let pem = format!("-----BEGIN PUBLIC KEY-----\n{key_b64}\n-----END PUBLIC KEY-----\n");

        assert!(RateLimiter::verify_signature(&blob, &sig_b64, &pem).is_ok());

        let mut tampered = blob;
        tampered[0] ^= 0x01;
        assert!(RateLimiter::verify_signature(&tampered, &sig_b64, &pem).is_err());
    }
}
