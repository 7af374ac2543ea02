//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements `S256` and `plain` code challenges per RFC 7636.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::PkceError;

/// Minimum verifier length (RFC 7636 §4.1).
pub const MIN_VERIFIER_LEN: usize = 43;
/// Maximum verifier length (RFC 7636 §4.1).
pub const MAX_VERIFIER_LEN: usize = 128;

/// Code challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PkceMethod {
    #[default]
    S256,
    Plain,
}

impl PkceMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl FromStr for PkceMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for PkceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the code challenge for a verifier.
///
/// `S256` yields `BASE64URL(SHA256(verifier))` without padding; `plain` yields the verifier.
pub fn compute_challenge(code_verifier: &str, method: PkceMethod) -> Result<String, PkceError> {
    let len = code_verifier.chars().count();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(PkceError::InvalidVerifier(len));
    }

    Ok(match method {
        PkceMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes())),
        PkceMethod::Plain => code_verifier.to_owned(),
    })
}

/// Verify a code verifier against the challenge stored with the authorization code.
///
/// The comparison runs in constant time. Any error (bad length) is a failed verification.
pub fn verify(code_verifier: &str, stored_challenge: &str, method: PkceMethod) -> bool {
    match compute_challenge(code_verifier, method) {
        Ok(computed) => computed.as_bytes().ct_eq(stored_challenge.as_bytes()).into(),
        Err(e) => {
            tracing::warn!(error = %e, "PKCE verification rejected verifier");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        assert_eq!(compute_challenge(VERIFIER, PkceMethod::S256).unwrap(), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, PkceMethod::S256));
    }

    #[test]
    fn test_s256_invalid_challenge() {
        assert!(!verify(VERIFIER, "wrong-challenge", PkceMethod::S256));
    }

    #[test]
    fn test_plain_exact_match() {
        assert!(verify(VERIFIER, VERIFIER, PkceMethod::Plain));
        assert!(!verify(VERIFIER, CHALLENGE, PkceMethod::Plain));
    }

    #[test]
    fn test_verifier_length_bounds() {
        let short = "a".repeat(42);
        let long = "a".repeat(129);
        assert_eq!(compute_challenge(&short, PkceMethod::S256), Err(PkceError::InvalidVerifier(42)));
        assert_eq!(compute_challenge(&long, PkceMethod::Plain), Err(PkceError::InvalidVerifier(129)));
        assert!(compute_challenge(&"a".repeat(43), PkceMethod::S256).is_ok());
        assert!(compute_challenge(&"a".repeat(128), PkceMethod::S256).is_ok());
        // plain with a short verifier still fails even if it equals the challenge
        assert!(!verify(&short, &short, PkceMethod::Plain));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("S256".parse::<PkceMethod>().unwrap(), PkceMethod::S256);
        assert_eq!("plain".parse::<PkceMethod>().unwrap(), PkceMethod::Plain);
        assert_eq!(
            "s256".parse::<PkceMethod>(),
            Err(PkceError::UnsupportedMethod("s256".to_string()))
        );
    }
}
