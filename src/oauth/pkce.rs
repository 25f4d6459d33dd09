//! PKCE (RFC 7636) and random identifier generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only challenge method this gateway issues or accepts
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// A PKCE verifier together with its S256 challenge
#[derive(Clone)]
pub struct PkcePair {
    /// Code verifier (kept by whoever runs the token exchange)
    pub verifier: String,
    /// `base64url(SHA-256(verifier))`, sent with the authorization request
    pub challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    /// Generate a fresh verifier (32 random bytes) and its challenge
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_token::<32>();
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Compute the S256 challenge for a verifier
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check that `verifier` reproduces `challenge` (constant time)
#[must_use]
pub fn verify(verifier: &str, challenge: &str) -> bool {
    let computed = challenge_for(verifier);
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// RFC 7636 §4.1: 43-128 characters from the unreserved set
#[must_use]
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Random state parameter (128 bits)
#[must_use]
pub fn generate_state() -> String {
    random_token::<16>()
}

/// `N` random bytes, base64url encoded without padding
#[must_use]
pub fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pair = PkcePair::generate();

        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
        assert!(verify(&pair.verifier, &pair.challenge));
    }

    #[test]
    fn rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_for(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn wrong_verifier_does_not_match() {
        let pair = PkcePair::generate();
        let other = PkcePair::generate();

        assert!(!verify(&other.verifier, &pair.challenge));
    }

    #[test]
    fn generated_verifier_is_rfc_compliant() {
        for _ in 0..10 {
            let pair = PkcePair::generate();
            assert!(is_valid_verifier(&pair.verifier), "{}", pair.verifier);
            assert!(!pair.challenge.contains('='));
        }
    }

    #[test]
    fn verifier_validation_rejects_short_and_bad_chars() {
        assert!(!is_valid_verifier("short"));
        assert!(!is_valid_verifier(&"a+".repeat(30)));
        assert!(is_valid_verifier(&"a".repeat(43)));
        assert!(!is_valid_verifier(&"a".repeat(129)));
    }

    #[test]
    fn state_has_128_bits_and_is_unique() {
        let s1 = generate_state();
        let s2 = generate_state();

        // 16 random bytes -> 22 base64url chars
        assert_eq!(s1.len(), 22);
        assert_ne!(s1, s2);
    }

    #[test]
    fn debug_redacts_verifier() {
        let pair = PkcePair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&pair.verifier));
    }
}
