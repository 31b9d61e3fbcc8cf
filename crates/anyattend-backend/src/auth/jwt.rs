//! JWT access token issuance and validation.

use anyattend_core::db::unix_timestamp;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use super::claims::Claims;

/// Who an access token is issued to.
#[derive(Debug, Clone, Copy)]
pub struct AccessSubject<'a> {
    pub legacy_admin_id: &'a str,
    pub identity_id: &'a str,
    pub anydesk_id: &'a str,
    pub display_anydesk_id: &'a str,
}

/// Manages JWT token creation and validation.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
}

impl JwtManager {
    /// Create a new `JwtManager` with the given secret.
    pub fn new(secret: &[u8], access_ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
        }
    }

    /// Issue an access token. Returns the token and its lifetime in seconds.
    pub fn issue_access_token(
        &self,
        subject: &AccessSubject<'_>,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = unix_timestamp();

        let claims = Claims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: subject.legacy_admin_id.to_string(),
            identity_id: subject.identity_id.to_string(),
            anydesk_id: subject.anydesk_id.to_string(),
            display_anydesk_id: subject.display_anydesk_id.to_string(),
            role: "admin".to_string(),
            iat: now,
            exp: now + self.access_ttl_secs,
            token_type: "access".to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, self.access_ttl_secs))
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}
