//! Commit/reveal fairness scheme and crash-point derivation (C1).
//!
//! A round's outcome is fixed the instant its `server_seed` is generated,
//! but the seed is never disclosed until the round settles. Clients only see
//! `commit_hash = SHA256(server_seed)` up front, and can independently
//! recompute the crash point from the revealed seed afterward via
//! [`verify_round`]. Neither party can influence the outcome after the
//! commit is published: the house can't change `server_seed` without
//! invalidating `commit_hash`, and the player's only input is the public
//! `client_seed`.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::primitives::Ppm;

type HmacSha256 = Hmac<Sha256>;

/// Crash point is clamped to `[1.00x, MAX_CRASH]`.
const MIN_CRASH_PPM: u64 = Ppm::UNIT;

/// Number of leading hex characters of the HMAC digest used as the raw
/// 40-bit integer `r`.
const DIGEST_HEX_CHARS: usize = 10;

/// Denominator `r` is reduced against before the `0.01 + 0.99/u` transform.
const SAMPLE_SPACE: u64 = 1_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// SEED GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Generate a fresh, cryptographically random 32-byte server seed, hex
/// encoded.
#[must_use]
pub fn generate_server_seed() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh public client seed. Distinct from `server_seed` only in
/// that it is never secret; a caller-supplied client seed is equally valid.
#[must_use]
pub fn generate_client_seed() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `SHA256(server_seed)`, published before the seed is ever used.
#[must_use]
pub fn commit_hash(server_seed: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hasher.finalize().into()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CRASH POINT DERIVATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive a round's crash point in parts-per-million.
///
/// Implements the construction bit-for-bit:
///
/// 1. `H = HMAC-SHA256(server_seed, client_seed || ":" || nonce)`.
/// 2. `r = int(H[0..10 hex chars], 16)`, a 40-bit integer.
/// 3. If `r mod house_edge_divisor == 0`, instant crash at `1.00x`.
/// 4. Otherwise `u = (r mod 1_000_000) / 1_000_000`. If `u == 0`, resample
///    deterministically from a second HMAC tagged `:resample`.
/// 5. `crash = 0.01 + 0.99 / u`, clamped to `[1.00, max_crash]`.
#[must_use]
pub fn derive_crash_point(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    house_edge_divisor: u64,
    max_crash: f64,
) -> u64 {
    let r = hmac_leading_int(server_seed, client_seed, nonce, None);

    if r % house_edge_divisor == 0 {
        return MIN_CRASH_PPM;
    }

    let mut sample = r % SAMPLE_SPACE;
    if sample == 0 {
        sample = hmac_leading_int(server_seed, client_seed, nonce, Some("resample")) % SAMPLE_SPACE;
    }
    // Still zero after resampling: fall back to the instant crash rather
    // than dividing by zero. Astronomically unlikely (p ≈ 1e-12) but not
    // impossible, and this keeps the function total.
    if sample == 0 {
        return MIN_CRASH_PPM;
    }

    #[allow(clippy::cast_precision_loss)]
    let u = sample as f64 / SAMPLE_SPACE as f64;
    let crash = 0.01 + 0.99 / u;
    let clamped = crash.clamp(1.0, max_crash);
    let rounded = (clamped * 100.0).round() / 100.0;
    Ppm::from_f64(rounded).raw()
}

fn hmac_leading_int(server_seed: &str, client_seed: &str, nonce: u64, tag: Option<&str>) -> u64 {
    let mut mac = HmacSha256::new_from_slice(server_seed.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(client_seed.as_bytes());
    mac.update(b":");
    mac.update(nonce.to_string().as_bytes());
    if let Some(tag) = tag {
        mac.update(b":");
        mac.update(tag.as_bytes());
    }
    let digest = mac.finalize().into_bytes();
    let hex_digest = hex::encode(digest);
    u64::from_str_radix(&hex_digest[..DIGEST_HEX_CHARS], 16).unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// VERIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of independently recomputing a round's crash point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationResult {
    /// Whether the recomputed crash point matches `expected_crash_ppm`.
    pub valid: bool,
    /// The recomputed crash point, in parts-per-million.
    pub computed_crash_ppm: u64,
}

/// Recompute a round's crash point from its revealed seed and compare
/// against the claimed outcome.
#[must_use]
pub fn verify_round(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    house_edge_divisor: u64,
    expected_crash_ppm: u64,
    max_crash: f64,
) -> VerificationResult {
    let computed_crash_ppm = derive_crash_point(server_seed, client_seed, nonce, house_edge_divisor, max_crash);
    VerificationResult {
        valid: computed_crash_ppm == expected_crash_ppm,
        computed_crash_ppm,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_CRASH: f64 = 1000.0;
    const HOUSE_EDGE_DIVISOR: u64 = 33;

    #[test]
    fn commit_hash_is_deterministic() {
        let seed = "abc123";
        assert_eq!(commit_hash(seed), commit_hash(seed));
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_crash_point("server", "client", 1, HOUSE_EDGE_DIVISOR, MAX_CRASH);
        let b = derive_crash_point("server", "client", 1, HOUSE_EDGE_DIVISOR, MAX_CRASH);
        assert_eq!(a, b);
    }

    #[test]
    fn derivation_never_below_one() {
        for nonce in 0..500u64 {
            let crash = derive_crash_point("server", "client", nonce, HOUSE_EDGE_DIVISOR, MAX_CRASH);
            assert!(crash >= MIN_CRASH_PPM, "nonce {nonce} produced {crash}");
        }
    }

    #[test]
    fn derivation_never_exceeds_max_crash() {
        for nonce in 0..500u64 {
            let crash = derive_crash_point("server", "client", nonce, HOUSE_EDGE_DIVISOR, MAX_CRASH);
            assert!(crash <= Ppm::from_f64(MAX_CRASH).raw(), "nonce {nonce} produced {crash}");
        }
    }

    #[test]
    fn different_nonces_produce_different_seeds_distribution() {
        let mut instant_crashes = 0u64;
        const SAMPLES: u64 = 50_000;
        for nonce in 0..SAMPLES {
            if derive_crash_point("server-seed-x", "client-seed-y", nonce, HOUSE_EDGE_DIVISOR, MAX_CRASH)
                == MIN_CRASH_PPM
            {
                instant_crashes += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = instant_crashes as f64 / SAMPLES as f64;
        // Expect close to 1/33 ≈ 3.03%, generously bounded since this
        // includes both the direct hit and the rare double-zero fallback.
        assert!(fraction > 0.02 && fraction < 0.05, "fraction={fraction}");
    }

    #[test]
    fn verify_round_accepts_matching_triple() {
        let crash = derive_crash_point("seed", "client", 7, HOUSE_EDGE_DIVISOR, MAX_CRASH);
        let result = verify_round("seed", "client", 7, HOUSE_EDGE_DIVISOR, crash, MAX_CRASH);
        assert!(result.valid);
        assert_eq!(result.computed_crash_ppm, crash);
    }

    #[test]
    fn verify_round_rejects_tampered_crash() {
        let crash = derive_crash_point("seed", "client", 7, HOUSE_EDGE_DIVISOR, MAX_CRASH);
        let result = verify_round("seed", "client", 7, HOUSE_EDGE_DIVISOR, crash + 1, MAX_CRASH);
        assert!(!result.valid);
    }

    #[test]
    fn generated_seeds_are_not_trivially_equal() {
        assert_ne!(generate_server_seed(), generate_server_seed());
        assert_ne!(generate_client_seed(), generate_client_seed());
    }
}
