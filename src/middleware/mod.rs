use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;

/// Держатель холдов и покупатель: пользователь из Basic Auth.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub surname: String,
    pub organization_id: Option<Uuid>,
}

/// Необязательный пользователь: без заголовка `Authorization` запрос анонимный,
/// с неверным заголовком отклоняется.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<AuthUser>);

impl Viewer {
    pub fn user_id(&self) -> Option<Uuid> {
        self.0.as_ref().map(|user| user.user_id)
    }
}

// Разбирает `Basic base64(email:password)`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;

    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (email, password) = credentials.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

async fn authenticate(headers: &HeaderMap, state: &crate::AppState) -> Result<AuthUser, AppError> {
    let (email, password) = basic_credentials(headers).ok_or(AppError::Unauthorized)?;

    let user = User::find_by_email(&email, &state.db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    // bcrypt намеренно медленный, не держим на нём рабочий поток рантайма
    let (user, valid) = tokio::task::spawn_blocking(move || {
        let valid = user.verify_password(&password);
        (user, valid)
    })
    .await
    .map_err(|_| AppError::Unauthorized)?;

    if !valid {
        return Err(AppError::Unauthorized);
    }

    Ok(AuthUser {
        user_id: user.id,
        email: user.email,
        first_name: user.first_name,
        surname: user.surname,
        organization_id: user.organization_id,
    })
}

// Basic Auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<crate::AppState>) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state).await
    }
}

impl FromRequestParts<Arc<crate::AppState>> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<crate::AppState>) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(Viewer(None));
        }
        authenticate(&parts.headers, state).await.map(|user| Viewer(Some(user)))
    }
}
