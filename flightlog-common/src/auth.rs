//! Session tokens and password hashing
//!
//! Tokens are HS256 JWTs carrying the crew member's nip, role level and the
//! token kind (access, refresh, password reset). Rotating the secret
//! invalidates every outstanding token.
//!
//! This module contains only pure functions; HTTP cookie handling lives in
//! the server crate.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::models::RoleLevel;
use crate::{Error, Result};

/// Recommended minimum secret length
pub const MIN_SECRET_LEN: usize = 32;

/// Lifetime of password reset tokens
const RESET_TOKEN_SECONDS: u64 = 30 * 60;

// ========================================
// Tokens
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

/// JWT payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Crew member nip
    pub sub: i64,
    pub level: RoleLevel,
    pub kind: TokenKind,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiration (Unix seconds)
    pub exp: u64,
}

/// Why a token was rejected
///
/// Callers distinguish expiry from every other failure: an expired refresh
/// token is an ordinary end of session, anything else means the token is
/// garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed(String),
    WrongKind { expected: TokenKind, found: TokenKind },
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Malformed(reason) => write!(f, "malformed token: {reason}"),
            TokenError::WrongKind { expected, found } => {
                write!(f, "expected {expected:?} token, got {found:?}")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    access_seconds: u64,
    refresh_seconds: u64,
}

impl TokenService {
    /// Create a token service
    ///
    /// Secrets shorter than `MIN_SECRET_LEN` still work but are logged.
    pub fn new(secret: impl Into<String>, access_seconds: u64, refresh_seconds: u64) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::Config("JWT secret must not be empty".into()));
        }
        if secret.len() < MIN_SECRET_LEN {
            warn!(
                "JWT secret is {} characters; at least {} are recommended",
                secret.len(),
                MIN_SECRET_LEN
            );
        }
        Ok(Self {
            secret,
            access_seconds,
            refresh_seconds,
        })
    }

    pub fn access_seconds(&self) -> u64 {
        self.access_seconds
    }

    pub fn refresh_seconds(&self) -> u64 {
        self.refresh_seconds
    }

    /// Issue a token of `kind` for a crew member
    pub fn issue(&self, kind: TokenKind, nip: i64, level: RoleLevel) -> Result<String> {
        let now = unix_now()?;
        let lifetime = match kind {
            TokenKind::Access => self.access_seconds,
            TokenKind::Refresh => self.refresh_seconds,
            TokenKind::Reset => RESET_TOKEN_SECONDS,
        };
        self.encode_claims(&Claims {
            sub: nip,
            level,
            kind,
            iat: now,
            exp: now + lifetime,
        })
    }

    /// Sign an arbitrary claim set
    pub fn encode_claims(&self, claims: &Claims) -> Result<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify signature, expiry and kind
    pub fn verify(&self, token: &str, expected: TokenKind) -> std::result::Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::Malformed("invalid signature".into()),
            _ => TokenError::Malformed(err.to_string()),
        })?;

        if data.claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                found: data.claims.kind,
            });
        }
        Ok(data.claims)
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::Internal(format!("System time error: {e}")))
}

/// Extract a token from an `Authorization` header value (`Bearer <token>`)
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

// ========================================
// Passwords
// ========================================

/// Hash a password using Argon2id (PHC string with salt and parameters)
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| Error::Internal(format!("Invalid password hash format: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-characters";

    fn service() -> TokenService {
        TokenService::new(SECRET, 900, 30 * 24 * 3600).unwrap()
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let svc = service();
        let token = svc.issue(TokenKind::Access, 135885, RoleLevel::Operator).unwrap();
        let claims = svc.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, 135885);
        assert_eq!(claims.level, RoleLevel::Operator);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let svc = service();
        let token = svc.issue(TokenKind::Refresh, 1, RoleLevel::Viewer).unwrap();
        assert!(matches!(
            svc.verify(&token, TokenKind::Access),
            Err(TokenError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_expired_distinguished_from_malformed() {
        let svc = service();
        let now = unix_now().unwrap();
        let expired = svc
            .encode_claims(&Claims {
                sub: 1,
                level: RoleLevel::Viewer,
                kind: TokenKind::Refresh,
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert_eq!(svc.verify(&expired, TokenKind::Refresh), Err(TokenError::Expired));
        assert!(matches!(
            svc.verify("not.a.token", TokenKind::Refresh),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_rotated_secret_invalidates_tokens() {
        let token = service().issue(TokenKind::Access, 1, RoleLevel::Viewer).unwrap();
        let rotated = TokenService::new("another-secret-that-is-also-32-chars-long", 900, 900).unwrap();
        assert!(matches!(
            rotated.verify(&token, TokenKind::Access),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_short_secret_still_works() {
        let svc = TokenService::new("short", 60, 60).unwrap();
        let token = svc.issue(TokenKind::Access, 5, RoleLevel::Admin).unwrap();
        assert!(svc.verify(&token, TokenKind::Access).is_ok());
        assert!(TokenService::new("", 60, 60).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("correct-horse-battery-staple").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct-horse-battery-staple", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
        assert!(verify_password("x", "not-a-hash").is_err());
    }
}
