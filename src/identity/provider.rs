//! Login, logout and refresh orchestration over the staff directory, the
//! token service and the revocation ledger.

use tracing::{info, warn};

use super::principal::{Principal, PublicStaff};
use super::session::RevocationLedger;
use super::token::TokenService;
use crate::directory::{self, StaffDirectory};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    /// Only present when the caller asked to be remembered.
    pub refresh_token: Option<String>,
    pub user: PublicStaff,
}

/// Credential check and token issuance. Missing user and wrong password are
/// indistinguishable to the caller.
pub fn login(
    dir: &StaffDirectory,
    tokens: &TokenService,
    req: &LoginRequest,
) -> AppResult<LoginResponse> {
    let Some(user) = dir.find_by_email(&req.email) else {
        return Err(AppError::credentials());
    };
    if !directory::verify_password(&user.password_hash, &req.password) {
        return Err(AppError::credentials());
    }
    if !user.active {
        return Err(AppError::auth("account_deactivated", "account deactivated"));
    }
    let principal = Principal { user_id: user.id.clone(), email: user.email.clone(), role: user.role };
    let token = tokens.issue_access(&principal)?;
    let refresh_token = if req.remember_me { Some(tokens.issue_refresh(&principal)?) } else { None };
    info!("auth.login user={} role={}", user.email, user.role);
    Ok(LoginResponse { token, refresh_token, user: user.public() })
}

/// Best-effort refresh-token invalidation. Logout must always succeed from the
/// caller's perspective, so a token that fails verification is logged and
/// swallowed rather than surfaced.
pub fn logout(tokens: &TokenService, ledger: &RevocationLedger, refresh_token: Option<&str>) {
    let Some(rt) = refresh_token else { return };
    match tokens.verify_refresh(rt) {
        Ok(claims) => {
            ledger.revoke(&claims.jti);
            info!("auth.logout user={} jti={}", claims.email, claims.jti);
        }
        Err(e) => {
            warn!("auth.logout: refresh token rejected, nothing to revoke: {e}");
        }
    }
}

/// Mint a fresh access token from a live refresh token. The user is re-fetched
/// so deactivation and role changes since login take effect here too.
pub fn refresh(
    dir: &StaffDirectory,
    tokens: &TokenService,
    ledger: &RevocationLedger,
    refresh_token: &str,
) -> AppResult<String> {
    let claims = tokens.verify_refresh(refresh_token)?;
    if ledger.is_revoked(&claims.jti) {
        return Err(AppError::auth("invalid_token", "invalid or expired token"));
    }
    let Some(user) = dir.find_by_id(&claims.sub) else {
        return Err(AppError::auth("unauthorized", "user not found"));
    };
    if !user.active {
        return Err(AppError::auth("unauthorized", "account deactivated"));
    }
    let principal = Principal { user_id: user.id.clone(), email: user.email.clone(), role: user.role };
    let token = tokens.issue_access(&principal)?;
    info!("auth.refresh user={} jti={}", user.email, claims.jti);
    Ok(token)
}
