//! Request extractors for authentication and client metadata.

use std::ops::Deref;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};
use tracing::debug;

use crate::error::{ApiError, StoreError};
use crate::models::accounts::User;
use crate::security::TokenType;
use crate::AppState;

/// Authenticated caller, resolved from the bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl Deref for AuthUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.is_staff || self.is_superuser {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    pub fn require_superuser(&self) -> Result<(), ApiError> {
        if self.is_superuser {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

pub(crate) fn app_state(req: &HttpRequest) -> Result<web::Data<AppState>, ApiError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("application state not configured".into()))
}

pub(crate) fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state?;
            let token = token.ok_or_else(ApiError::unauthenticated)?;
            let claims = state
                .tokens
                .decode(&token, TokenType::Access)
                .map_err(|e| {
                    debug!(error = %e, "Rejected access token");
                    ApiError::Unauthorized("Given token not valid for any token type".into())
                })?;

            let user = match state.ehr.get_user(claims.sub).await {
                Ok(user) => user,
                Err(StoreError::NotFound(_)) => return Err(ApiError::Unauthorized("User not found".into())),
                Err(e) => return Err(e.into()),
            };
            if !user.is_active {
                return Err(ApiError::Unauthorized("User is inactive".into()));
            }
            Ok(AuthUser(user))
        })
    }
}

/// Caller address and user agent, recorded on audit rows.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: String,
}

impl ClientInfo {
    fn from_request_head(req: &HttpRequest) -> Self {
        let ip_address = req
            .connection_info()
            .realip_remote_addr()
            .map(|addr| strip_port(addr).to_string());
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Self {
            ip_address,
            user_agent,
        }
    }
}

fn strip_port(addr: &str) -> &str {
    // Bracketed IPv6 with port, IPv4 with port, or a bare address.
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    }
}

impl FromRequest for ClientInfo {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(ClientInfo::from_request_head(req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use test_case::test_case;

    #[test_case("10.0.0.5:54321", "10.0.0.5")]
    #[test_case("10.0.0.5", "10.0.0.5")]
    #[test_case("[::1]:8080", "::1")]
    #[test_case("::1", "::1")]
    fn ports_are_stripped(addr: &str, expected: &str) {
        assert_eq!(strip_port(addr), expected);
    }

    #[test]
    fn bearer_header_parsing() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc.def"));

        let basic = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic xyz"))
            .to_http_request();
        assert_eq!(bearer_token(&basic), None);
    }

    #[test]
    fn client_info_prefers_forwarded_for() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "203.0.113.9"))
            .insert_header((header::USER_AGENT, "curl/8"))
            .to_http_request();
        let info = ClientInfo::from_request_head(&req);
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.user_agent, "curl/8");
    }
}
