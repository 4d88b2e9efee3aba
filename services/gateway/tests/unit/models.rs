//! Request and envelope model tests

use pretty_assertions::assert_eq;
use rstest::*;
use serde_json::json;

use clinical_gateway::models::{
    DEFAULT_PER_PAGE, ErrorResponse, LoginRequest, Pagination, PaginationQuery, RegisterRequest,
};

fn pagination(
    page: Option<&str>,
    per_page: Option<&str>,
    sort_order: Option<&str>,
) -> PaginationQuery {
    PaginationQuery {
        page: page.map(String::from),
        per_page: per_page.map(String::from),
        sort_by: None,
        sort_order: sort_order.map(String::from),
    }
}

#[rstest]
#[case(None, None, None, 1, DEFAULT_PER_PAGE, "desc")]
#[case(Some("3"), Some("50"), Some("ASC"), 3, 50, "asc")]
#[case(Some("0"), Some("0"), Some("sideways"), 1, DEFAULT_PER_PAGE, "desc")]
#[case(Some("-4"), Some("1000"), None, 1, DEFAULT_PER_PAGE, "desc")]
fn test_pagination_is_clamped(
    #[case] page: Option<&str>,
    #[case] per_page: Option<&str>,
    #[case] sort_order: Option<&str>,
    #[case] expected_page: u32,
    #[case] expected_per_page: u32,
    #[case] expected_order: &str,
) {
    let normalized = pagination(page, per_page, sort_order).normalize().unwrap();
    assert_eq!(
        normalized,
        Pagination {
            page: expected_page,
            per_page: expected_per_page,
            sort_by: "created_at".to_string(),
            sort_order: expected_order.to_string(),
        }
    );
}

#[rstest]
#[case(Some("abc"), None)]
#[case(None, Some("ten"))]
fn test_non_numeric_pagination_is_rejected(
    #[case] page: Option<&str>,
    #[case] per_page: Option<&str>,
) {
    assert!(pagination(page, per_page, None).normalize().is_err());
}

fn registration(body: serde_json::Value) -> RegisterRequest {
    serde_json::from_value(body).unwrap()
}

#[test]
fn test_registration_accepts_patient_and_doctor() {
    let patient = registration(json!({
        "email": "new@clinic.local", "password": "long-enough", "name": "New Patient"
    }));
    let doctor = registration(json!({
        "email": "dr@clinic.local", "password": "long-enough", "name": "Dr. Who", "role": "doctor"
    }));

    assert_eq!(patient.validate(), Ok(()));
    assert_eq!(doctor.validate(), Ok(()));
}

#[rstest]
#[case(json!({ "email": "not-an-email", "password": "long-enough", "name": "X" }))]
#[case(json!({ "email": "a@clinic.local", "password": "short", "name": "X" }))]
#[case(json!({ "email": "a@clinic.local", "password": "long-enough", "name": "  " }))]
#[case(json!({
    "email": "a@clinic.local",
    "password": "long-enough",
    "name": "X",
    "role": "admin"
}))]
fn test_registration_rejects(#[case] body: serde_json::Value) {
    assert!(registration(body).validate().is_err());
}

#[test]
fn test_credentials_never_reach_debug_output() {
    let login = LoginRequest {
        email: "demo@clinic.local".to_string(),
        password: "password123".to_string(),
    };
    let register = registration(json!({
        "email": "new@clinic.local", "password": "hunter2hunter2", "name": "New"
    }));

    assert!(!format!("{login:?}").contains("password123"));
    assert!(!format!("{register:?}").contains("hunter2hunter2"));
}

#[test]
fn test_error_envelope_omits_empty_fields() {
    let body = serde_json::to_value(ErrorResponse::new("route not found")).unwrap();
    assert_eq!(body, json!({ "error": "route not found" }));

    let envelope = ErrorResponse::new("invalid request").with_details("page must be a number");
    let body = serde_json::to_value(envelope).unwrap();
    assert_eq!(body, json!({ "error": "invalid request", "details": "page must be a number" }));
}
