//! JWT Authentication
//!
//! Validates JWTs from an external auth provider and resolves the user id
//! and display name of a connection. The server never issues tokens. When
//! authentication is not required, connections without a valid token play
//! as guests.

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::env_flag;
use crate::network::protocol::ErrorCode;
use crate::user::UserId;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Reject connections without a valid token.
    pub required: bool,
    /// Skip expiry validation (tests only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_JWT_SECRET").ok(),
            required: env_flag("AUTH_REQUIRED").unwrap_or(false),
            skip_expiry: false,
        }
    }

    /// Check if a verification key is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims we read from provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the provider's user id.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Display name, if the provider sends one.
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenClaims {
    /// Stable user id derived from the subject claim.
    pub fn userid(&self) -> UserId {
        let mut hasher = Sha256::new();
        hasher.update(b"stack-arena-user:");
        hasher.update(self.sub.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..12])
    }

    /// Display name, falling back to a name derived from the user id.
    pub fn username(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("player-{}", &self.userid()[..6]),
        }
    }
}

/// Who a connection turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// User id.
    pub userid: UserId,
    /// Display name.
    pub username: String,
    /// True for an unauthenticated guest.
    pub guest: bool,
}

impl AuthenticatedUser {
    /// Fresh guest identity.
    pub fn guest() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            username: format!("Guest{}", &id[..4]),
            userid: format!("guest-{}", &id[..16]),
            guest: true,
        }
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// The handshake carried no token.
    #[error("missing token")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl AuthError {
    /// Error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::MissingToken => ErrorCode::NotAuthenticated,
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::InvalidFormat | AuthError::InvalidSignature => ErrorCode::InvalidToken,
            _ => ErrorCode::AuthFailed,
        }
    }
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (algorithm, key) = if let Some(pem) = &config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {e}")))?;
        (Algorithm::RS256, key)
    } else if let Some(secret) = &config.secret {
        (Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))
    } else {
        return Err(AuthError::NotConfigured);
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(audience) = &config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> =
        decode(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Tokens with exp = 0 pass the library check; treat them as non-expiring
    if !config.skip_expiry && claims.exp > 0 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Resolve the identity behind a handshake token.
///
/// With `required` unset, an empty token, a server without keys, or a token
/// that fails validation all fall back to a guest identity.
pub fn authenticate(token: &str, config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    let token = token.trim();
    let result = if token.is_empty() {
        Err(AuthError::MissingToken)
    } else {
        validate_token(token, config)
    };

    match result {
        Ok(claims) => Ok(AuthenticatedUser {
            userid: claims.userid(),
            username: claims.username(),
            guest: false,
        }),
        Err(err) if config.required => Err(err),
        Err(_) => Ok(AuthenticatedUser::guest()),
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn create_test_token(claims: &TokenClaims, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&header, claims, &key).unwrap()
    }

    fn test_claims() -> TokenClaims {
        let now = chrono::Utc::now().timestamp() as u64;
        TokenClaims {
            sub: "user123".into(),
            exp: now + 3600,
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
            name: Some("Alice".into()),
        }
    }

    fn secret_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token_validation() {
        let token = create_test_token(&test_claims(), SECRET);
        let claims = validate_token(&token, &secret_config()).unwrap();
        assert_eq!(claims.sub, "user123");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = test_claims();
        claims.exp = 1;
        let token = create_test_token(&claims, SECRET);

        let result = validate_token(&token, &secret_config());
        assert!(matches!(result, Err(AuthError::Expired)));
        assert_eq!(result.unwrap_err().code(), ErrorCode::TokenExpired);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = create_test_token(&test_claims(), "correct-secret-key-here!!!!!");
        let config = AuthConfig {
            secret: Some("wrong-secret-key-here!!!!!!".into()),
            ..Default::default()
        };
        assert!(matches!(
            validate_token(&token, &config),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_missing_sub_rejected() {
        let mut claims = test_claims();
        claims.sub = String::new();
        let token = create_test_token(&claims, SECRET);
        assert!(matches!(
            validate_token(&token, &secret_config()),
            Err(AuthError::MissingClaim(_))
        ));
    }

    #[test]
    fn test_issuer_validation() {
        let token = create_test_token(&test_claims(), SECRET);
        let config = AuthConfig {
            issuer: Some("wrong-issuer".into()),
            ..secret_config()
        };
        assert!(matches!(
            validate_token(&token, &config),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn test_userid_derivation() {
        let claims = test_claims();
        assert_eq!(claims.userid(), claims.userid());
        assert_eq!(claims.userid().len(), 24);

        let other = TokenClaims {
            sub: "user456".into(),
            ..claims.clone()
        };
        assert_ne!(claims.userid(), other.userid());
    }

    #[test]
    fn test_username_fallback() {
        let mut claims = test_claims();
        assert_eq!(claims.username(), "Alice");
        claims.name = Some("   ".into());
        assert!(claims.username().starts_with("player-"));
    }

    #[test]
    fn test_not_configured_error() {
        assert!(matches!(
            validate_token("some.jwt.token", &AuthConfig::default()),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn test_authenticate_resolves_identity() {
        let token = create_test_token(&test_claims(), SECRET);
        let user = authenticate(&token, &secret_config()).unwrap();
        assert!(!user.guest);
        assert_eq!(user.username, "Alice");
        assert_eq!(user.userid, test_claims().userid());
    }

    #[test]
    fn test_guest_when_not_required() {
        let user = authenticate("", &AuthConfig::default()).unwrap();
        assert!(user.guest);
        assert!(user.userid.starts_with("guest-"));

        // A bad token also degrades to a guest
        let user = authenticate("garbage", &secret_config()).unwrap();
        assert!(user.guest);
    }

    #[test]
    fn test_required_rejects_missing_token() {
        let config = AuthConfig {
            required: true,
            ..secret_config()
        };
        let err = authenticate("", &config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAuthenticated);
        assert!(authenticate("garbage", &config).is_err());
    }
}
