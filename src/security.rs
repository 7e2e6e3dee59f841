//! Password hashing and bearer token handling.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("expected a {expected} token")]
    WrongTokenType { expected: TokenType },
}

pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SecurityError::Hash(e.to_string()))
}

/// Unparseable hashes count as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub token_type: TokenType,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity embedded in issued tokens.
#[derive(Debug, Clone)]
pub struct Subject<'a> {
    pub id: i64,
    pub username: &'a str,
    pub role: &'a str,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenKeys {
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            access_ttl: Duration::minutes(auth.access_token_minutes),
            refresh_ttl: Duration::days(auth.refresh_token_days),
        }
    }

    pub fn issue(&self, subject: &Subject<'_>, token_type: TokenType) -> Result<String, SecurityError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: subject.id,
            username: subject.username.to_string(),
            role: subject.role.to_string(),
            is_staff: subject.is_staff,
            is_superuser: subject.is_superuser,
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn issue_pair(&self, subject: &Subject<'_>) -> Result<TokenPair, SecurityError> {
        Ok(TokenPair {
            access: self.issue(subject, TokenType::Access)?,
            refresh: self.issue(subject, TokenType::Refresh)?,
        })
    }

    /// Decodes and checks signature, expiry and token type.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, SecurityError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        if data.claims.token_type != expected {
            return Err(SecurityError::WrongTokenType { expected });
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new(&AuthConfig::default())
    }

    fn subject() -> Subject<'static> {
        Subject {
            id: 7,
            username: "nurse.ada",
            role: "Nursing Officer",
            is_staff: false,
            is_superuser: false,
        }
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong-pass", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn access_token_decodes_with_claims() {
        let keys = keys();
        let token = keys.issue(&subject(), TokenType::Access).unwrap();
        let claims = keys.decode(&token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username, "nurse.ada");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_token_rejected_as_access() {
        let keys = keys();
        let pair = keys.issue_pair(&subject()).unwrap();
        assert!(matches!(
            keys.decode(&pair.refresh, TokenType::Access),
            Err(SecurityError::WrongTokenType { .. })
        ));
        assert!(keys.decode(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn tokens_have_distinct_ids() {
        let keys = keys();
        let a = keys.decode(&keys.issue(&subject(), TokenType::Refresh).unwrap(), TokenType::Refresh).unwrap();
        let b = keys.decode(&keys.issue(&subject(), TokenType::Refresh).unwrap(), TokenType::Refresh).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = TokenKeys::new(&AuthConfig {
            jwt_secret: "another-secret".into(),
            ..AuthConfig::default()
        });
        let token = other.issue(&subject(), TokenType::Access).unwrap();
        assert!(keys().decode(&token, TokenType::Access).is_err());
    }
}
