//! JWT issuing and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use pointgate_shared::{Privilege, UserId};

/// Clock skew tolerated when checking `exp`
const LEEWAY_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a decimal string
    pub sub: String,
    /// Privilege at issue time; the middleware re-reads the account anyway
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<UserId, JwtError> {
        self.sub
            .parse()
            .map_err(|_| JwtError::Invalid(format!("subject '{}' is not a user id", self.sub)))
    }
}

/// An issued token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            expiry_hours,
        }
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.expiry_hours * 3600
    }

    pub fn generate_access_token(
        &self,
        user_id: UserId,
        privilege: Privilege,
    ) -> Result<IssuedToken, JwtError> {
        self.generate_at(user_id, privilege, OffsetDateTime::now_utc())
    }

    fn generate_at(
        &self,
        user_id: UserId,
        privilege: Privilege,
        issued_at: OffsetDateTime,
    ) -> Result<IssuedToken, JwtError> {
        let expires_at = issued_at + time::Duration::seconds(self.access_token_expiry_seconds());
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user_id.get().to_string(),
            role: privilege.as_str().to_string(),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: jti.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Validate signature (HS256 only) and expiry
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            })?;

        claims.user_id()?;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-key-at-least-32-chars!";

    #[test]
    fn round_trip_preserves_claims() {
        let jwt = JwtManager::new(TEST_SECRET, 24);

        let issued = jwt
            .generate_access_token(UserId(42), Privilege::Administrator)
            .unwrap();
        let claims = jwt.validate_token(&issued.token).unwrap();

        assert_eq!(claims.sub, "42");
        assert_eq!(claims.user_id().unwrap(), UserId(42));
        assert_eq!(claims.role, "administrator");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = JwtManager::new(TEST_SECRET, 24);
        let other = JwtManager::new("another-secret-key-at-least-32-chars", 24);

        let issued = issuer
            .generate_access_token(UserId(1), Privilege::Ordinary)
            .unwrap();

        assert!(matches!(
            other.validate_token(&issued.token),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected_beyond_leeway() {
        let jwt = JwtManager::new(TEST_SECRET, 1);
        let issued_at = OffsetDateTime::now_utc() - time::Duration::hours(2);

        let issued = jwt
            .generate_at(UserId(1), Privilege::Ordinary, issued_at)
            .unwrap();

        assert!(matches!(jwt.validate_token(&issued.token), Err(JwtError::Expired)));
    }

    #[test]
    fn token_within_leeway_is_accepted() {
        let jwt = JwtManager::new(TEST_SECRET, 1);
        // expired 30s ago, inside the 60s leeway
        let issued_at = OffsetDateTime::now_utc() - time::Duration::seconds(3600 + 30);

        let issued = jwt
            .generate_at(UserId(1), Privilege::Ordinary, issued_at)
            .unwrap();

        assert!(jwt.validate_token(&issued.token).is_ok());
    }

    #[test]
    fn jtis_are_unique() {
        let jwt = JwtManager::new(TEST_SECRET, 24);

        let a = jwt.generate_access_token(UserId(1), Privilege::Ordinary).unwrap();
        let b = jwt.generate_access_token(UserId(1), Privilege::Ordinary).unwrap();

        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let jwt = JwtManager::new(TEST_SECRET, 24);

        for token in ["", "completely-invalid", "not.a.valid.token"] {
            assert!(jwt.validate_token(token).is_err(), "{token:?}");
        }
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        let jwt = JwtManager::new(TEST_SECRET, 24);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            role: "ordinary".to_string(),
            iat: now,
            exp: now + 3600,
            jti: "j".to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &jwt.encoding_key).unwrap();

        assert!(matches!(jwt.validate_token(&token), Err(JwtError::Invalid(_))));
    }
}
