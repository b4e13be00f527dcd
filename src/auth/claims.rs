use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Bearer token payload. All timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: i64,    // user ID
    pub iss: String, // issuer
    pub aud: String, // audience
    pub iat: i64,    // issued at
    pub nbf: i64,    // not before
    pub exp: i64,    // expires at
}

impl Claims {
    pub fn new(sub: i64, iss: &str, aud: &str, now: OffsetDateTime, ttl: Duration) -> Self {
        let iat = now.unix_timestamp();
        Self {
            sub,
            iss: iss.to_string(),
            aud: aud.to_string(),
            iat,
            nbf: iat,
            exp: (now + ttl).unix_timestamp(),
        }
    }
}
