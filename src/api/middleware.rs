//! Auth extractors
//!
//! Bearer extraction and the two extractor flavors handlers use:
//! [`RequireUser`] rejects anonymous callers with 401, [`MaybeUser`] carries
//! `Option<CurrentUser>` for routes with public behavior.

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use super::handlers::AppState;
use super::responses::ApiError;
use crate::auth::CurrentUser;

/// Pull the token out of `Authorization: Bearer <token>`
fn extract_bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Extractor requiring an authenticated caller
pub struct RequireUser(pub CurrentUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let user = state.services.auth.authenticate(&token)?;
        Ok(RequireUser(user))
    }
}

/// Extractor tolerating anonymous callers. An invalid token is still a 401;
/// only a missing one maps to `None`.
pub struct MaybeUser(pub Option<CurrentUser>);

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match extract_bearer_token(parts) {
            Some(token) => {
                let user = state.services.auth.authenticate(&token)?;
                Ok(MaybeUser(Some(user)))
            }
            None => Ok(MaybeUser(None)),
        }
    }
}
