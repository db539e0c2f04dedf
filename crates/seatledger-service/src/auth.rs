//! Buyer identity resolution.
//!
//! Every purchase and refund is attributed to the buyer resolved from the
//! caller's token. Resolution failure surfaces as `not_authenticated`; the
//! seat operation is never attempted.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use seatledger_core::{codes, BuyerId};

use crate::config::ServiceConfig;

/// Why a token could not be resolved to a buyer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token was supplied.
    #[error("missing token")]
    MissingToken,

    /// The token failed signature, expiry, issuer or audience validation.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token's subject is not a buyer ID.
    #[error("token subject is not a buyer id: {0}")]
    InvalidSubject(String),

    /// No verification key is configured.
    #[error("token verification is not configured")]
    NotConfigured,
}

impl AuthError {
    /// Stable result code reported for every resolution failure.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        codes::NOT_AUTHENTICATED
    }
}

/// Resolves a caller token to the buyer it identifies.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token` (optionally prefixed with `Bearer `).
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the token does not identify a buyer.
    async fn resolve_buyer_id(&self, token: &str) -> Result<BuyerId, AuthError>;
}

/// JWT claims of a buyer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerClaims {
    /// Subject (buyer ID).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

/// HS256 JWT resolver.
pub struct JwtIdentityResolver {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtIdentityResolver {
    /// Resolver verifying tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            key: Some(DecodingKey::from_secret(secret)),
            validation: Self::validation(issuer, audience),
        }
    }

    /// Resolver built from the service configuration. Without
    /// `auth_jwt_secret` every real token is rejected.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        match &config.auth_jwt_secret {
            Some(secret) => Self::new(secret.as_bytes(), &config.auth_issuer, &config.auth_audience),
            None => {
                tracing::warn!("AUTH_JWT_SECRET not configured - buyer tokens will be rejected");
                Self {
                    key: None,
                    validation: Self::validation(&config.auth_issuer, &config.auth_audience),
                }
            }
        }
    }

    fn validation(issuer: &str, audience: &str) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve_buyer_id(&self, token: &str) -> Result<BuyerId, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        // Allow test tokens in testing only.
        // This bypass is gated behind #[cfg(test)] or the "test-auth" feature
        // to ensure it is never active in production builds.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(buyer) = token.strip_prefix("test-token:") {
            return buyer
                .parse::<BuyerId>()
                .map_err(|_| AuthError::InvalidSubject(buyer.to_string()));
        }

        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;

        let data = decode::<BuyerClaims>(token, key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            AuthError::InvalidToken(e.to_string())
        })?;

        data.claims
            .sub
            .parse::<BuyerId>()
            .map_err(|_| AuthError::InvalidSubject(data.claims.sub))
    }
}
