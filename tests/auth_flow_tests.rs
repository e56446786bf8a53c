//! Auth flow tests: login, refresh, logout and the per-request authentication
//! helper, exercised at library level against a tempdir-backed directory.

use anyhow::Result;
use axum::http::HeaderMap;
use tempfile::tempdir;

use brigade::directory::{NewStaff, StaffDirectory};
use brigade::error::AppError;
use brigade::identity::provider::{self, LoginRequest};
use brigade::identity::{RevocationLedger, Role, TokenService};
use brigade::server::{authenticate, AppState};

fn tokens() -> TokenService {
    TokenService::new("test-access-secret", "test-refresh-secret", "15m", "7d").unwrap()
}

fn seed_directory(dir: &StaffDirectory) {
    let staff = |email: &str, role: Role| NewStaff {
        email: email.into(),
        name: email.split('@').next().unwrap_or("staff").to_string(),
        role,
        password: "correct horse".into(),
        phone_number: None,
    };
    dir.create(staff("admin@example.com", Role::Admin)).unwrap();
    dir.create(staff("waiter@example.com", Role::Waiter)).unwrap();
    let cook = dir.create(staff("cook@example.com", Role::KitchenStaff)).unwrap();
    dir.set_active(&cook.id, false).unwrap();
}

fn state(dir: StaffDirectory) -> AppState {
    AppState {
        directory: std::sync::Arc::new(dir),
        tokens: tokens(),
        ledger: std::sync::Arc::new(RevocationLedger::new()),
    }
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
    headers
}

fn login_req(email: &str, password: &str, remember_me: bool) -> LoginRequest {
    LoginRequest { email: email.into(), password: password.into(), remember_me }
}

#[test]
fn login_issues_decodable_token_and_distinct_refresh() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();

    let resp = provider::login(&dir, &svc, &login_req("admin@example.com", "correct horse", true))
        .expect("login should succeed");
    let refresh = resp.refresh_token.clone().expect("remember_me should yield a refresh token");
    assert_ne!(resp.token, refresh);

    let user = dir.find_by_email("admin@example.com").unwrap();
    let claims = svc.verify_access(&resp.token)?;
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.role, "ADMIN");
    assert_eq!(resp.user.email, "admin@example.com");

    // The issued token authenticates a subsequent request as the same identity.
    let st = state(dir);
    let (fetched, principal) = authenticate(&st, &bearer(&resp.token)).expect("token should authenticate");
    assert_eq!(fetched.id, user.id);
    assert_eq!(principal.role, Role::Admin);
    Ok(())
}

#[test]
fn login_without_remember_me_issues_no_refresh_token() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let resp = provider::login(&dir, &tokens(), &login_req("admin@example.com", "correct horse", false))
        .expect("login should succeed");
    assert!(resp.refresh_token.is_none());
    Ok(())
}

#[test]
fn wrong_password_and_unknown_email_are_indistinguishable() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();

    let wrong_pw = provider::login(&dir, &svc, &login_req("admin@example.com", "wrong", false))
        .expect_err("wrong password must fail");
    let no_user = provider::login(&dir, &svc, &login_req("ghost@example.com", "whatever", false))
        .expect_err("unknown email must fail");
    assert_eq!(wrong_pw.code_str(), no_user.code_str());
    assert_eq!(wrong_pw.message(), no_user.message());
    assert_eq!(wrong_pw.http_status(), 401);
    Ok(())
}

#[test]
fn deactivated_user_cannot_login() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let err = provider::login(&dir, &tokens(), &login_req("cook@example.com", "correct horse", false))
        .expect_err("deactivated account must not authenticate");
    assert_eq!(err.http_status(), 401);
    Ok(())
}

#[test]
fn authentication_rejects_missing_and_malformed_tokens() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let st = state(dir);

    // No Authorization header at all.
    let err = authenticate(&st, &HeaderMap::new()).expect_err("missing token");
    assert_eq!(err.http_status(), 401);

    // Wrong scheme.
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Basic abc".parse().unwrap());
    assert_eq!(authenticate(&st, &headers).unwrap_err().http_status(), 401);

    // Garbage bearer token.
    assert_eq!(authenticate(&st, &bearer("garbage")).unwrap_err().http_status(), 401);

    // Token signed with a different secret.
    let foreign = TokenService::new("evil", "evil", "15m", "7d").unwrap();
    let user = st.directory.find_by_email("admin@example.com").unwrap();
    let principal = brigade::identity::Principal {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
    };
    let forged = foreign.issue_access(&principal).unwrap();
    assert_eq!(authenticate(&st, &bearer(&forged)).unwrap_err().http_status(), 401);
    Ok(())
}

#[test]
fn authentication_rejects_users_deactivated_after_issue() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();
    let resp = provider::login(&dir, &svc, &login_req("waiter@example.com", "correct horse", false))?;

    let st = state(dir);
    assert!(authenticate(&st, &bearer(&resp.token)).is_ok());

    // Deactivate between requests: the very next call must fail because the
    // user is re-fetched every time.
    let waiter = st.directory.find_by_email("waiter@example.com").unwrap();
    st.directory.set_active(&waiter.id, false)?;
    let err = authenticate(&st, &bearer(&resp.token)).expect_err("deactivated mid-session");
    assert_eq!(err.http_status(), 401);
    assert_eq!(err.message(), "account deactivated");
    Ok(())
}

#[test]
fn authentication_rejects_deleted_subjects() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();
    // Token for a subject that does not exist in the directory.
    let principal = brigade::identity::Principal {
        user_id: "no-such-user".into(),
        email: "ghost@example.com".into(),
        role: Role::Admin,
    };
    let token = svc.issue_access(&principal).unwrap();
    let st = state(dir);
    let err = authenticate(&st, &bearer(&token)).expect_err("unknown subject");
    assert_eq!(err.http_status(), 401);
    assert_eq!(err.message(), "user not found");
    Ok(())
}

#[test]
fn refresh_mints_new_access_token_until_revoked() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();
    let ledger = RevocationLedger::new();

    let resp = provider::login(&dir, &svc, &login_req("admin@example.com", "correct horse", true))?;
    let rt = resp.refresh_token.unwrap();

    let fresh = provider::refresh(&dir, &svc, &ledger, &rt).expect("live refresh token");
    let claims = svc.verify_access(&fresh)?;
    assert_eq!(claims.role, "ADMIN");

    // Logout revokes the refresh token; minting must now fail undifferentiated.
    provider::logout(&svc, &ledger, Some(&rt));
    let err = provider::refresh(&dir, &svc, &ledger, &rt).expect_err("revoked token");
    assert_eq!(err.http_status(), 401);
    assert_eq!(err.message(), "invalid or expired token");
    Ok(())
}

#[test]
fn refresh_rejects_deactivated_users() -> Result<()> {
    let tmp = tempdir()?;
    let dir = StaffDirectory::open(tmp.path())?;
    seed_directory(&dir);
    let svc = tokens();
    let ledger = RevocationLedger::new();

    let resp = provider::login(&dir, &svc, &login_req("waiter@example.com", "correct horse", true))?;
    let rt = resp.refresh_token.unwrap();
    let waiter = dir.find_by_email("waiter@example.com").unwrap();
    dir.set_active(&waiter.id, false)?;

    let err = provider::refresh(&dir, &svc, &ledger, &rt).expect_err("deactivated user");
    assert_eq!(err.http_status(), 401);
    Ok(())
}

#[test]
fn logout_with_invalid_refresh_token_is_swallowed() {
    let svc = tokens();
    let ledger = RevocationLedger::new();
    // Must not panic or error; there is simply nothing to revoke.
    provider::logout(&svc, &ledger, Some("definitely-not-a-token"));
    provider::logout(&svc, &ledger, None);
}

#[test]
fn validation_collects_field_errors() {
    use brigade::server::{validate_registration, RegisterPayload};
    let payload = RegisterPayload {
        email: "not-an-email".into(),
        password: "short".into(),
        name: "".into(),
        role: "MANAGER".into(),
        phone_number: None,
    };
    let err = validate_registration(&payload).expect_err("all fields invalid");
    match err {
        AppError::Validation { fields, .. } => {
            let named: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
            assert_eq!(named, vec!["email", "password", "name", "role"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let ok = RegisterPayload {
        email: "new@example.com".into(),
        password: "long enough".into(),
        name: "New Staff".into(),
        role: "WAITER".into(),
        phone_number: Some("555-0101".into()),
    };
    let new = validate_registration(&ok).expect("valid payload");
    assert_eq!(new.role, Role::Waiter);
    assert_eq!(new.email, "new@example.com");
}
