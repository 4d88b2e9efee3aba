//! Bearer token issuing and validation
//!
//! Access tokens carry the caller's identity and role and are signed with the
//! configured HMAC secret. Refresh tokens carry only the subject and are signed
//! with a key derived from that secret, so neither validator accepts the other
//! kind of token.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;

const REFRESH_SECRET_SUFFIX: &str = "-refresh";
const MAX_TTL_SECONDS: i64 = 10 * 365 * 86400;

/// Caller roles used for authorization decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject user id
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

/// Claims carried by a refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization header is missing")]
    Missing,
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
}

impl AuthError {
    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
        }
    }

    /// Message safe to return to clients
    #[must_use]
    pub const fn client_message(self) -> &'static str {
        match self {
            Self::Missing => "authorization header is required",
            Self::Malformed | Self::InvalidSignature => "invalid token",
            Self::Expired => "token has expired",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => Self::InvalidSignature,
            _ => Self::Malformed,
        }
    }
}

/// Issues and validates access and refresh tokens
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let refresh_secret = format!("{}{REFRESH_SECRET_SUFFIX}", config.jwt_secret);

        // Only the HMAC family verifies against a shared secret; anything else
        // in the header is refused before the signature is checked.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;

        Self {
            access_encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl: seconds(config.token_expiry_seconds),
            refresh_ttl: seconds(config.refresh_token_expiry_seconds),
            validation,
        }
    }

    /// Access token lifetime in seconds
    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Issue an access token valid from now
    pub fn issue(
        &self,
        subject: &str,
        email: &str,
        role: Role,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(subject, email, role, Utc::now())
    }

    /// Issue an access token with an explicit issued-at instant
    pub fn issue_at(
        &self,
        subject: &str,
        email: &str,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = AccessClaims {
            sub: subject.to_string(),
            email: email.to_string(),
            role,
            iat: issued_at.timestamp(),
            exp: (issued_at + self.access_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
    }

    /// Validate an access token and return its claims
    pub fn validate(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let data = decode::<AccessClaims>(token, &self.access_decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// Issue a refresh token valid from now
    pub fn issue_refresh(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_refresh_at(subject, Utc::now())
    }

    /// Issue a refresh token with an explicit issued-at instant
    pub fn issue_refresh_at(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = RefreshClaims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.refresh_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
    }

    /// Validate a refresh token and return its subject
    pub fn validate_refresh(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)?;
        Ok(data.claims.sub)
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(MAX_TTL_SECONDS).min(MAX_TTL_SECONDS))
}
