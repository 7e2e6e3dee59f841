//! Token issue, rotation and the caller's own account.

use actix_web::{web, HttpResponse};
use chrono::{TimeZone, Utc};
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use super::{audit, ApiResult};
use crate::api::middleware::{AuthUser, ClientInfo};
use crate::error::ApiError;
use crate::models::accounts::{ChangePassword, LoginRequest, LoginResponse, RefreshRequest, UserUpdate, UserView};
use crate::models::audit::{AuditAction, AuditResult, NewActivity, Severity};
use crate::security::{self, Claims, TokenType};
use crate::AppState;

const AUTH_MODULE: &str = "authentication";

fn invalid_token() -> ApiError {
    ApiError::Unauthorized("Token is invalid or expired".into())
}

/// Decodes a refresh token and rejects one already blacklisted.
async fn live_refresh(state: &AppState, token: &str) -> Result<Claims, ApiError> {
    let claims = state
        .tokens
        .decode(token, TokenType::Refresh)
        .map_err(|_| invalid_token())?;
    if state.ehr.is_token_blacklisted(&claims.jti).await? {
        return Err(ApiError::Unauthorized("Token is blacklisted".into()));
    }
    Ok(claims)
}

/// Claims the token's jti; a token someone else already spent is rejected.
async fn blacklist(state: &AppState, claims: &Claims) -> Result<(), ApiError> {
    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    if !state.ehr.blacklist_token(&claims.jti, claims.sub, expires_at).await? {
        return Err(ApiError::Unauthorized("Token is blacklisted".into()));
    }
    Ok(())
}

pub async fn token(
    state: web::Data<AppState>,
    client: ClientInfo,
    body: web::Json<LoginRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let identifier = body.identifier().to_string();

    let user = state
        .ehr
        .find_login_user(&identifier)
        .await?
        .filter(|u| u.is_active && security::verify_password(&body.password, &u.password_hash));

    let Some(mut user) = user else {
        warn!(identifier = %identifier, "Failed login attempt");
        audit(
            &state,
            NewActivity::new(AuditAction::Login, AUTH_MODULE, "user", "")
                .repr(identifier.clone())
                .describe(format!("Failed login attempt for {identifier}"))
                .outcome(AuditResult::Failure, Severity::Warning)
                .client(&client),
        )
        .await;
        return Err(ApiError::Unauthorized(
            "No active account found with the given credentials".into(),
        ));
    };

    user.last_login = Some(state.ehr.record_login(user.id).await?);
    let pair = state.tokens.issue_pair(&user.subject())?;

    let name = user.full_name();
    info!(user_id = user.id, "User logged in");
    audit(
        &state,
        NewActivity::new(AuditAction::Login, AUTH_MODULE, "user", user.id)
            .by(Some(user.id))
            .repr(name.clone())
            .describe(format!("User {name} logged in successfully via API"))
            .client(&client),
    )
    .await;

    Ok(HttpResponse::Ok().json(LoginResponse {
        access: pair.access,
        refresh: pair.refresh,
        user: UserView::from(user),
    }))
}

/// Issues a fresh pair and blacklists the presented refresh token.
pub async fn refresh(state: web::Data<AppState>, body: web::Json<RefreshRequest>) -> ApiResult {
    let claims = live_refresh(&state, &body.refresh).await?;
    let user = state
        .ehr
        .get_user(claims.sub)
        .await
        .map_err(|_| invalid_token())?;
    if !user.is_active {
        return Err(ApiError::Unauthorized("User is inactive".into()));
    }

    blacklist(&state, &claims).await?;
    let pair = state.tokens.issue_pair(&user.subject())?;
    Ok(HttpResponse::Ok().json(pair))
}

/// Logout.
pub async fn blacklist_token(
    state: web::Data<AppState>,
    user: AuthUser,
    client: ClientInfo,
    body: web::Json<RefreshRequest>,
) -> ApiResult {
    let claims = live_refresh(&state, &body.refresh).await?;
    blacklist(&state, &claims).await?;

    let name = user.full_name();
    audit(
        &state,
        NewActivity::new(AuditAction::Logout, AUTH_MODULE, "user", user.id)
            .by(Some(user.id))
            .repr(name.clone())
            .describe(format!("User {name} logged out"))
            .client(&client),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({})))
}

pub async fn me(user: AuthUser) -> ApiResult {
    Ok(HttpResponse::Ok().json(UserView::from(user.0)))
}

pub async fn update_me(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<UserUpdate>,
) -> ApiResult {
    let update = body.into_inner();
    update.validate()?;
    let updated = state.ehr.update_user(user.id, update.self_service()).await?;
    Ok(HttpResponse::Ok().json(UserView::from(updated)))
}

pub async fn change_password(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<ChangePassword>,
) -> ApiResult {
    let body = body.into_inner();
    body.validate()?;
    if !security::verify_password(&body.old_password, &user.password_hash) {
        return Err(ApiError::field("old_password", "Old password is incorrect."));
    }
    if let Some(confirm) = &body.new_password_confirm {
        if *confirm != body.new_password {
            return Err(ApiError::field("new_password", "Password fields didn't match."));
        }
    }

    let hash = security::hash_password(&body.new_password)?;
    state.ehr.set_password(user.id, &hash).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password changed successfully." })))
}

pub async fn my_permissions(state: web::Data<AppState>, user: AuthUser) -> ApiResult {
    let permissions = state.ehr.effective_permissions(user.id).await?;
    Ok(HttpResponse::Ok().json(permissions))
}
