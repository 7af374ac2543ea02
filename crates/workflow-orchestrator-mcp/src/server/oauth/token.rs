//! Signed bearer tokens.
//!
//! Access and refresh tokens are JWTs carrying subject, client, scope, issuer,
//! audience, timestamps and a `token_type` claim. Verification checks the
//! signature, issuer, audience and expiry in one pass, then the token kind.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::{Config, JwtAlgorithm};
use crate::error::{KeyError, TokenError};

/// Purpose embedded in a token's `token_type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
    /// Short-lived login cookie; never a bearer credential.
    DemoSession,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::DemoSession => "demo_session",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by every token this server mints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Internal user id.
    pub sub: String,
    pub client_id: String,
    pub scope: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique per mint so tokens issued in the same second differ.
    pub jti: String,
    #[serde(rename = "token_type")]
    pub kind: TokenKind,
}

/// Parameters for minting a token.
#[derive(Debug, Clone, Copy)]
pub struct MintRequest<'a> {
    pub subject: &'a str,
    pub client_id: &'a str,
    pub scope: &'a str,
    pub kind: TokenKind,
    pub ttl: std::time::Duration,
}

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies signed tokens.
///
/// Key material is loaded once at construction and shared read-only.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    asymmetric: bool,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    /// Build a codec from configuration.
    ///
    /// RSA algorithms load PEM keys from the configured paths. If either key is
    /// missing or unreadable the codec logs a warning and signs with HS256 over
    /// the shared secret instead.
    pub fn new(config: &Config) -> Result<Self, KeyError> {
        if config.jwt_secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }

        let issuer = config.issuer().to_string();
        let audience = config.audience().to_string();

        if config.jwt_algorithm.is_asymmetric() {
            match load_rsa_keys(config) {
                Ok((encoding, decoding)) => {
                    tracing::info!(algorithm = %config.jwt_algorithm, "Loaded RSA signing keys");
                    return Ok(Self {
                        algorithm: to_jwt_algorithm(config.jwt_algorithm),
                        encoding,
                        decoding,
                        asymmetric: true,
                        issuer,
                        audience,
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        algorithm = %config.jwt_algorithm,
                        reason = %reason,
                        "RSA keys unavailable, falling back to HS256 with shared secret"
                    );
                    return Ok(Self::shared_secret(Algorithm::HS256, &config.jwt_secret, issuer, audience));
                }
            }
        }

        Ok(Self::shared_secret(
            to_jwt_algorithm(config.jwt_algorithm),
            &config.jwt_secret,
            issuer,
            audience,
        ))
    }

    fn shared_secret(algorithm: Algorithm, secret: &str, issuer: String, audience: String) -> Self {
        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            asymmetric: false,
            issuer,
            audience,
        }
    }

    /// Algorithm actually used for signing (after any fallback).
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Whether tokens are signed with an RSA key pair.
    #[must_use]
    pub const fn is_asymmetric(&self) -> bool {
        self.asymmetric
    }

    /// Mint a token that expires `ttl` from now.
    pub fn mint(&self, request: MintRequest<'_>) -> Result<MintedToken, TokenError> {
        self.mint_at(request, Utc::now())
    }

    /// Mint a token as if issued at `issued_at`.
    pub fn mint_at(
        &self,
        request: MintRequest<'_>,
        issued_at: DateTime<Utc>,
    ) -> Result<MintedToken, TokenError> {
        let ttl = chrono::Duration::from_std(request.ttl)
            .map_err(|e| TokenError::Signing(format!("ttl out of range: {e}")))?;
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| TokenError::Signing("ttl out of range".to_string()))?;

        let claims = Claims {
            sub: request.subject.to_string(),
            client_id: request.client_id.to_string(),
            scope: request.scope.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            kind: request.kind,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(MintedToken { token, expires_at })
    }

    /// Verify a token and require it to be of `expected` kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(classify)?;

        if data.claims.kind != expected {
            return Err(TokenError::KindMismatch {
                expected: expected.as_str(),
                actual: data.claims.kind.as_str().to_string(),
            });
        }

        Ok(data.claims)
    }

    /// Decode a token's payload without checking anything.
    ///
    /// Diagnostics only. Never use the result for access decisions.
    pub fn inspect(token: &str) -> Result<serde_json::Value, TokenError> {
        let mut segments = token.split('.');
        let (Some(_), Some(payload), Some(_), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TokenError::Malformed(format!("payload is not JSON: {e}")))
    }

    /// JWKS document, present only when signing with an RSA key pair.
    ///
    /// Key population is not implemented; the set is always empty.
    #[must_use]
    pub fn jwks(&self) -> Option<serde_json::Value> {
        self.asymmetric.then(|| serde_json::json!({ "keys": [] }))
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

fn to_jwt_algorithm(alg: JwtAlgorithm) -> Algorithm {
    match alg {
        JwtAlgorithm::Hs256 => Algorithm::HS256,
        JwtAlgorithm::Hs384 => Algorithm::HS384,
        JwtAlgorithm::Hs512 => Algorithm::HS512,
        JwtAlgorithm::Rs256 => Algorithm::RS256,
        JwtAlgorithm::Rs384 => Algorithm::RS384,
        JwtAlgorithm::Rs512 => Algorithm::RS512,
    }
}

fn load_rsa_keys(config: &Config) -> Result<(EncodingKey, DecodingKey), String> {
    let (Some(private_path), Some(public_path)) =
        (config.jwt_private_key_path.as_deref(), config.jwt_public_key_path.as_deref())
    else {
        return Err("JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH must both be set".to_string());
    };

    let private_pem = read_pem(private_path)?;
    let public_pem = read_pem(public_path)?;

    let encoding = EncodingKey::from_rsa_pem(&private_pem)
        .map_err(|e| format!("invalid RSA private key: {e}"))?;
    let decoding = DecodingKey::from_rsa_pem(&public_pem)
        .map_err(|e| format!("invalid RSA public key: {e}"))?;
    Ok((encoding, decoding))
}

fn read_pem(path: &str) -> Result<Vec<u8>, String> {
    std::fs::read(Path::new(path)).map_err(|e| format!("cannot read {path}: {e}"))
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => TokenError::Malformed(err.to_string()),
        _ => TokenError::InvalidSignature(err.to_string()),
    }
}
