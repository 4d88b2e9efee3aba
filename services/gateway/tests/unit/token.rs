//! Token service unit tests

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rstest::*;

use clinical_gateway::{
    config::AuthConfig,
    token::{AuthError, Role, TokenService},
};

use crate::common::TEST_SECRET;

#[fixture]
fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        token_expiry_seconds: 3600,
        refresh_token_expiry_seconds: 86400,
        ..AuthConfig::default()
    }
}

#[fixture]
fn tokens(auth_config: AuthConfig) -> TokenService {
    TokenService::new(&auth_config)
}

#[rstest]
#[case(Role::Patient)]
#[case(Role::Doctor)]
#[case(Role::Admin)]
fn test_access_token_carries_identity(tokens: TokenService, #[case] role: Role) {
    let token = tokens.issue("u-7", "u7@clinic.local", role).unwrap();
    let claims = tokens.validate(&token).unwrap();

    assert_eq!(claims.sub, "u-7");
    assert_eq!(claims.email, "u7@clinic.local");
    assert_eq!(claims.role, role);
    assert_eq!(claims.exp - claims.iat, 3600);
}

#[rstest]
fn test_expired_access_token(tokens: TokenService) {
    let issued = Utc::now() - Duration::hours(2);
    let token = tokens.issue_at("u-1", "u1@clinic.local", Role::Patient, issued).unwrap();

    assert_matches!(tokens.validate(&token), Err(AuthError::Expired));
}

#[rstest]
fn test_foreign_secret_is_rejected(tokens: TokenService) {
    let other = TokenService::new(&AuthConfig {
        jwt_secret: "some-other-secret".to_string(),
        ..AuthConfig::default()
    });
    let token = other.issue("u-1", "u1@clinic.local", Role::Admin).unwrap();

    assert_matches!(tokens.validate(&token), Err(AuthError::InvalidSignature));
}

#[rstest]
#[case("")]
#[case("not-a-jwt")]
#[case("a.b.c")]
fn test_garbage_is_malformed(tokens: TokenService, #[case] token: &str) {
    assert_matches!(tokens.validate(token), Err(AuthError::Malformed));
}

#[rstest]
fn test_refresh_and_access_tokens_do_not_mix(tokens: TokenService) {
    let refresh = tokens.issue_refresh("demo@clinic.local").unwrap();
    let access = tokens.issue("u-1", "demo@clinic.local", Role::Patient).unwrap();

    assert_eq!(tokens.validate_refresh(&refresh).unwrap(), "demo@clinic.local");
    assert_matches!(tokens.validate(&refresh), Err(AuthError::InvalidSignature));
    assert_matches!(tokens.validate_refresh(&access), Err(AuthError::InvalidSignature));
}

#[rstest]
fn test_expired_refresh_token(tokens: TokenService) {
    let issued = Utc::now() - Duration::days(2);
    let refresh = tokens.issue_refresh_at("demo@clinic.local", issued).unwrap();

    assert_matches!(tokens.validate_refresh(&refresh), Err(AuthError::Expired));
}

#[rstest]
fn test_oversized_lifetime_is_clamped(mut auth_config: AuthConfig) {
    auth_config.token_expiry_seconds = u64::MAX;
    let tokens = TokenService::new(&auth_config);
    let token = tokens.issue("u-1", "u1@clinic.local", Role::Patient).unwrap();

    assert!(tokens.validate(&token).is_ok());
    assert!(tokens.access_ttl_seconds() > 0);
}
