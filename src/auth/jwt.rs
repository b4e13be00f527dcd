use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::Claims;
use crate::config::JwtConfig;

/// The only algorithm accepted on verification.
const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Signs and verifies bearer tokens with a process-wide HMAC secret.
/// Holds no per-request state; share it behind an `Arc`.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }

    /// Claims for a fresh session of `user_id`, valid from now for the configured ttl.
    pub fn claims_for(&self, user_id: i64) -> Claims {
        Claims::new(
            user_id,
            &self.issuer,
            &self.audience,
            OffsetDateTime::now_utc(),
            self.ttl,
        )
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let token = encode(&Header::new(ALGORITHM), claims, &self.encoding)
            .map_err(TokenError::Signing)?;
        debug!(user_id = claims.sub, "jwt signed");
        Ok(token)
    }

    pub fn sign(&self, user_id: i64) -> Result<String, TokenError> {
        self.issue(&self.claims_for(user_id))
    }

    /// Rejects bad signatures, any algorithm other than HS256, missing or
    /// past `exp`, future `nbf`, and issuer/audience mismatches.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation()).map_err(TokenError::Invalid)?;
        debug!(user_id = data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.algorithms = vec![ALGORITHM];
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud"]);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation
    }
}
