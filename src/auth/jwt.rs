//! Access/refresh token issuance and verification.

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    pub kind: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies JWTs against a single HMAC secret.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self { secret: secret.into(), access_ttl, refresh_ttl }
    }

    fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let now = Utc::now();
        let exp = now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::minutes(15));

        let claims = Claims {
            sub: user_id.to_string(),
            kind: kind.as_str().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| EngineError::internal(format!("failed to sign token: {e}")))
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String> {
        self.issue(user_id, TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String> {
        self.issue(user_id, TokenKind::Refresh)
    }

    fn verify(&self, token: &str, expected_kind: TokenKind) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| EngineError::Authorization(format!("invalid token: {e}")))?;

        if data.claims.kind != expected_kind.as_str() {
            return Err(EngineError::Authorization("token kind mismatch".to_string()));
        }

        Ok(data.claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Uuid> {
        let claims = self.verify(token, TokenKind::Access)?;
        Uuid::parse_str(&claims.sub)
            .map_err(|e| EngineError::Authorization(format!("invalid subject claim: {e}")))
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Uuid> {
        let claims = self.verify(token, TokenKind::Refresh)?;
        Uuid::parse_str(&claims.sub)
            .map_err(|e| EngineError::Authorization(format!("invalid subject claim: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(900), Duration::from_secs(86400))
    }

    #[test]
    fn test_access_token_roundtrip() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let token = svc.issue_access_token(user_id).unwrap();
        assert_eq!(svc.verify_access_token(&token).unwrap(), user_id);
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let svc = service();
        let user_id = Uuid::new_v4();
        let token = svc.issue_refresh_token(user_id).unwrap();
        assert!(svc.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let svc = service();
        assert!(svc.verify_access_token("not-a-jwt").is_err());
    }
}
