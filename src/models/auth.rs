use axum::{
    Json,
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::Serialize;
use tower_cookies::Cookie;

use crate::models::user::UserProfile;

/// The access and refresh cookies handed back by every auth flow.
#[derive(Debug, Clone)]
pub struct AuthCookies {
    pub access: Cookie<'static>,
    pub refresh: Cookie<'static>,
}

impl AuthCookies {
    /// `Set-Cookie` header values, access first.
    pub fn header_values(&self) -> [String; 2] {
        [self.access.to_string(), self.refresh.to_string()]
    }
}

/// The JSON body of auth responses.
#[derive(Debug, Serialize)]
pub struct AuthBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub cookies: AuthCookies,
    pub profile: UserProfile,
}

/// Result of refresh, logout and logout-all.
#[derive(Debug, Clone)]
pub struct SessionResponse {
    pub cookies: AuthCookies,
    pub message: &'static str,
}

fn with_cookies(cookies: &AuthCookies, body: AuthBody) -> Response {
    let [access, refresh] = cookies.header_values();
    (
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]),
        Json(body),
    )
        .into_response()
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        with_cookies(
            &self.cookies,
            AuthBody {
                success: true,
                message: "Login successful".to_string(),
                user: Some(self.profile),
            },
        )
    }
}

impl IntoResponse for SessionResponse {
    fn into_response(self) -> Response {
        with_cookies(
            &self.cookies,
            AuthBody {
                success: true,
                message: self.message.to_string(),
                user: None,
            },
        )
    }
}
