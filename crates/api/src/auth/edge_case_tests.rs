//! Edge Case Tests for Authentication
//!
//! Tests boundary conditions in:
//! - Bearer/cookie token extraction
//! - JWT expiry and claim handling
//! - Password hashing inputs

#[cfg(test)]
mod extraction_tests {
    use super::super::middleware::{extract_bearer_token, AUTH_COOKIE};
    use axum::{body::Body, extract::Request, http::header};

    fn request_with(headers: &[(header::HeaderName, &str)]) -> Request {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    // =========================================================================
    // Header wins over cookie when both are present
    // =========================================================================
    #[test]
    fn test_header_preferred_over_cookie() {
        let cookie = format!("{AUTH_COOKIE}=from-cookie");
        let request = request_with(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, cookie.as_str()),
        ]);

        assert_eq!(extract_bearer_token(&request).as_deref(), Some("from-header"));
    }

    // =========================================================================
    // Non-bearer schemes fall through to the cookie
    // =========================================================================
    #[test]
    fn test_basic_auth_header_is_ignored() {
        let cookie = format!("{AUTH_COOKIE}=from-cookie");
        let request = request_with(&[
            (header::AUTHORIZATION, "Basic dXNlcjpwYXNz"),
            (header::COOKIE, cookie.as_str()),
        ]);

        assert_eq!(extract_bearer_token(&request).as_deref(), Some("from-cookie"));
    }

    // =========================================================================
    // Cookie names that merely share a prefix must not match
    // =========================================================================
    #[test]
    fn test_cookie_prefix_collision() {
        let cookie = format!("{AUTH_COOKIE}_legacy=stale; other=1");
        let request = request_with(&[(header::COOKIE, cookie.as_str())]);

        assert_eq!(extract_bearer_token(&request), None);
    }

    // =========================================================================
    // Empty cookie value counts as absent
    // =========================================================================
    #[test]
    fn test_empty_cookie_value() {
        let cookie = format!("{AUTH_COOKIE}=");
        let request = request_with(&[(header::COOKIE, cookie.as_str())]);

        assert_eq!(extract_bearer_token(&request), None);
    }
}

#[cfg(test)]
mod jwt_tests {
    use super::super::jwt::*;
    use pointgate_shared::{Privilege, UserId};

    const TEST_SECRET: &str = "edge-case-secret-at-least-32-characters";

    // =========================================================================
    // Expiry is measured from issue time in whole hours
    // =========================================================================
    #[test]
    fn test_access_token_expiry_hours() {
        let jwt = JwtManager::new(TEST_SECRET, 1);
        assert_eq!(jwt.access_token_expiry_seconds(), 3600);

        let issued = jwt
            .generate_access_token(UserId(7), Privilege::Ordinary)
            .unwrap();
        let claims = jwt.validate_token(&issued.token).unwrap();
        assert_eq!(claims.exp, issued.expires_at.unix_timestamp());
    }

    // =========================================================================
    // A token with its payload swapped fails the signature check
    // =========================================================================
    #[test]
    fn test_tampered_payload_rejected() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let jwt = JwtManager::new(TEST_SECRET, 24);
        let issued = jwt
            .generate_access_token(UserId(7), Privilege::Ordinary)
            .unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        let payload = URL_SAFE_NO_PAD.decode(parts[1]).unwrap();
        let mut claims: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        claims["role"] = serde_json::json!("administrator");
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(matches!(jwt.validate_token(&forged), Err(JwtError::Invalid(_))));
    }

    // =========================================================================
    // `alg: none` tokens are never accepted
    // =========================================================================
    #[test]
    fn test_unsigned_token_rejected() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let jwt = JwtManager::new(TEST_SECRET, 24);
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"1","role":"administrator","iat":0,"exp":9999999999,"jti":"x"}"#,
        );

        assert!(jwt.validate_token(&format!("{header}.{payload}.")).is_err());
    }
}

#[cfg(test)]
mod password_tests {
    use super::super::password::*;

    // =========================================================================
    // Same password hashes differently each time (random salt)
    // =========================================================================
    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();

        assert_ne!(a, b);
        assert!(verify_password("same password", &a));
        assert!(verify_password("same password", &b));
    }

    // =========================================================================
    // Length is counted in characters, not bytes
    // =========================================================================
    #[test]
    fn test_strength_counts_chars() {
        // 7 chars, 13 bytes
        assert!(validate_password_strength("пароль1").is_err());
        assert!(validate_password_strength("пароль12").is_ok());
    }
}
