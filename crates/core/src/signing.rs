//! API key generation, hashing, and webhook HMAC signing utilities.
//!
//! Lives in `core` so the auth manager (inbound verification) and the
//! webhook client (outbound signing) share one implementation.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of the generated API key string (alphanumeric characters).
pub const KEY_LENGTH: usize = 48;

/// Length of the generated per-key signing secret.
pub const SIGNING_SECRET_LENGTH: usize = 64;

/// Number of leading characters stored as a human-visible prefix.
pub const KEY_PREFIX_LENGTH: usize = 8;

/// Header carrying the API key on webhook traffic.
pub const HEADER_API_KEY: &str = "x-api-key";

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const HEADER_SIGNATURE: &str = "x-signature";

/// Header carrying the unix-seconds send time.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

// ---------------------------------------------------------------------------
// API key generation
// ---------------------------------------------------------------------------

/// The result of generating a new API key.
pub struct GeneratedApiKey {
    /// The plaintext key (shown to the user exactly once, never stored).
    pub plaintext: String,
    /// The first [`KEY_PREFIX_LENGTH`] characters of the key for display.
    pub prefix: String,
    /// The SHA-256 hex digest of the plaintext key.
    pub hash: String,
}

/// Generate a new random API key.
pub fn generate_api_key() -> GeneratedApiKey {
    let key = random_alphanumeric(KEY_LENGTH);
    let prefix = key[..KEY_PREFIX_LENGTH].to_string();
    let hash = hash_api_key(&key);

    GeneratedApiKey {
        plaintext: key,
        prefix,
        hash,
    }
}

/// Generate the shared secret a key holder uses to sign request bodies.
pub fn generate_signing_secret() -> String {
    random_alphanumeric(SIGNING_SECRET_LENGTH)
}

fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Compute the SHA-256 hex digest of an API key.
///
/// Used both during key creation (to store the hash) and during
/// authentication (to look up the key by hash).
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Extract the prefix from a plaintext API key.
pub fn extract_prefix(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(KEY_PREFIX_LENGTH)
        .map_or(key.len(), |(i, _)| i);
    &key[..end]
}

// ---------------------------------------------------------------------------
// Webhook HMAC signing
// ---------------------------------------------------------------------------

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}

/// Compute an HMAC-SHA256 signature over a raw request body.
///
/// Returns the lowercase hex-encoded signature.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against a raw request body.
///
/// The comparison is constant-time. Malformed hex is a mismatch, never an
/// error, so callers cannot distinguish the two.
pub fn verify_body(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = mac_for(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Whether a unix-seconds timestamp lies within `max_skew_secs` of `now_secs`.
pub fn timestamp_within_skew(timestamp_secs: i64, now_secs: i64, max_skew_secs: i64) -> bool {
    max_skew_secs >= 0 && now_secs.abs_diff(timestamp_secs) <= max_skew_secs.unsigned_abs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Key generation ----------------------------------------------------

    #[test]
    fn generated_key_has_correct_length() {
        let key = generate_api_key();
        assert_eq!(key.plaintext.len(), KEY_LENGTH);
        assert!(key.plaintext.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_key_prefix_matches_start() {
        let key = generate_api_key();
        assert_eq!(&key.plaintext[..KEY_PREFIX_LENGTH], key.prefix);
    }

    #[test]
    fn hash_matches_regeneration() {
        let key = generate_api_key();
        assert_eq!(key.hash, hash_api_key(&key.plaintext));
        assert_eq!(key.hash.len(), 64);
    }

    #[test]
    fn different_keys_produce_different_hashes() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn extract_prefix_handles_short_key() {
        assert_eq!(extract_prefix("abcdefghijklmnop"), "abcdefgh");
        assert_eq!(extract_prefix("abc"), "abc");
    }

    // -- HMAC signing ------------------------------------------------------

    #[test]
    fn signature_is_hex_sha256() {
        let sig = sign_body("my_secret", br#"{"event":"test"}"#);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let sig = sign_body("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_rejects_malformed_hex() {
        assert!(!verify_body("secret", b"body", "not-hex"));
        assert!(!verify_body("secret", b"body", ""));
    }

    #[test]
    fn verify_rejects_changed_secret() {
        let sig = sign_body("secret_a", b"payload");
        assert!(!verify_body("secret_b", b"payload", &sig));
    }

    #[test]
    fn skew_window_is_symmetric() {
        assert!(timestamp_within_skew(1_000, 1_300, 300));
        assert!(timestamp_within_skew(1_300, 1_000, 300));
        assert!(!timestamp_within_skew(1_000, 1_301, 300));
    }

    #[test]
    fn skew_window_handles_extreme_timestamps() {
        assert!(!timestamp_within_skew(i64::MIN, 1_700_000_000, 300));
        assert!(!timestamp_within_skew(i64::MAX, -1_700_000_000, 300));
        assert!(!timestamp_within_skew(i64::MIN, i64::MAX, 300));
        assert!(timestamp_within_skew(i64::MAX, i64::MAX, 0));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: verify(sign(body)) holds for every body and secret.
            #[test]
            fn sign_then_verify_round_trips(
                body in proptest::collection::vec(any::<u8>(), 0..512),
                secret in "[A-Za-z0-9]{1,64}",
            ) {
                let sig = sign_body(&secret, &body);
                prop_assert!(verify_body(&secret, &body, &sig));
            }

            /// Property: flipping any single body byte breaks verification.
            #[test]
            fn any_body_byte_change_breaks_verification(
                body in proptest::collection::vec(any::<u8>(), 1..256),
                index in any::<prop::sample::Index>(),
                flip in 1u8..=255,
            ) {
                let sig = sign_body("secret", &body);
                let mut tampered = body.clone();
                let i = index.index(tampered.len());
                tampered[i] ^= flip;
                prop_assert!(!verify_body("secret", &tampered, &sig));
            }

            /// Property: changing any signature character breaks verification.
            #[test]
            fn any_signature_change_breaks_verification(
                body in proptest::collection::vec(any::<u8>(), 0..128),
                index in 0usize..64,
            ) {
                let sig = sign_body("secret", &body);
                let mut chars: Vec<char> = sig.chars().collect();
                chars[index] = if chars[index] == '0' { '1' } else { '0' };
                let tampered: String = chars.into_iter().collect();
                prop_assert!(!verify_body("secret", &body, &tampered));
            }

            /// Property: the skew check never panics and matches wide arithmetic.
            #[test]
            fn skew_check_matches_wide_arithmetic(
                timestamp in any::<i64>(),
                now in any::<i64>(),
                skew in 0i64..=i64::MAX,
            ) {
                let wide = (i128::from(now) - i128::from(timestamp)).abs() <= i128::from(skew);
                prop_assert_eq!(timestamp_within_skew(timestamp, now, skew), wide);
            }
        }
    }
}
