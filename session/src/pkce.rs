use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::Digest;
use sha2::Sha256;

#[derive(Debug, Clone)]
pub struct PkceCodes {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkceCodes {
    pub fn generate() -> Self {
        let code_verifier = random_token::<64>();
        let code_challenge = code_challenge_for(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))`, the S256 challenge method.
pub fn code_challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random URL-safe token built from `N` bytes of entropy.
pub fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_and_within_rfc_bounds() {
        let codes = PkceCodes::generate();
        // 64 bytes of entropy -> 86 base64url characters (RFC 7636: 43..=128).
        assert_eq!(codes.code_verifier.len(), 86);
        assert!(
            codes
                .code_verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn challenge_matches_rfc_7636_example() {
        assert_eq!(
            code_challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(random_token::<16>(), random_token::<16>());
        let a = PkceCodes::generate();
        let b = PkceCodes::generate();
        assert_ne!(a.code_verifier, b.code_verifier);
    }
}
