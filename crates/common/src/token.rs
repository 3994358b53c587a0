//! Signed tokens.
//!
//! Two kinds of HS256 JWT cross the service boundary:
//! - service tokens: minted per internal call, `{service, requestId, iat, exp}`,
//!   valid for about a minute
//! - user tokens: issued by the external auth service, `{sub, role, exp}`,
//!   decoded here into an [`AuthContext`]

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AuthContext, RequestId, Role, UserId};

/// Default lifetime of a service token.
pub const SERVICE_TOKEN_TTL: Duration = Duration::from_secs(60);

/// Clock skew tolerated when checking `exp`.
const LEEWAY_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token missing")]
    Missing,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(err.to_string()),
        }
    }
}

/// Claims carried by an inter-service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClaims {
    /// Name of the calling service.
    pub service: String,
    pub request_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints service tokens for outgoing internal calls.
#[derive(Clone)]
pub struct ServiceTokenSigner {
    key: EncodingKey,
    service: String,
    ttl: Duration,
}

impl ServiceTokenSigner {
    pub fn new(secret: &[u8], service: impl Into<String>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
            service: service.into(),
            ttl: SERVICE_TOKEN_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issues a token for one call made on behalf of `request_id`.
    pub fn issue(&self, request_id: &RequestId) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let claims = ServiceClaims {
            service: self.service.clone(),
            request_id: request_id.to_string(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    /// Signs arbitrary claims with this signer's key.
    pub fn sign(&self, claims: &ServiceClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for ServiceTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTokenSigner")
            .field("service", &self.service)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Verifies incoming service tokens.
#[derive(Clone)]
pub struct ServiceTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl ServiceTokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Checks signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<ServiceClaims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        let data = decode::<ServiceClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Deserialize)]
struct UserClaims {
    sub: String,
    #[serde(default)]
    role: Role,
}

/// Decodes user bearer tokens into an [`AuthContext`].
#[derive(Clone)]
pub struct UserTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl UserTokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthContext, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        let data = decode::<UserClaims>(token, &self.key, &self.validation)?;
        let user_id = UserId::parse(&data.claims.sub)
            .map_err(|_| TokenError::Invalid("sub is not a user id".to_string()))?;
        Ok(AuthContext::new(user_id, data.claims.role))
    }
}
