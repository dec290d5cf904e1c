//! # Authentication
//!
//! Bearer JWT validation (HS256, audience `authenticated`, subject = user
//! UUID) plus a process-wide seeding secret that resolves to a configured
//! admin identity. Per-image access rules live on [`CurrentUser`]; the HTTP
//! extractors are in `api::middleware`.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::storage::Visibility;

/// Application role derived from the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this user may read an image given its owner and visibility
    pub fn can_access_image(&self, owner: Option<Uuid>, visibility: Visibility) -> bool {
        if visibility.is_public() {
            return true;
        }
        owner == Some(self.id) || self.is_admin()
    }

    /// Whether this user may modify or delete an image
    pub fn can_modify_image(&self, owner: Option<Uuid>) -> bool {
        owner == Some(self.id) || self.is_admin()
    }
}

/// JWT payload shape
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user UUID
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: usize,
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// No JWT secret configured; surfaced as a server error, not a 401
    #[error("authentication not configured")]
    NotConfigured,

    /// Seeding key accepted but no admin identity to resolve it to
    #[error("seeding not configured properly")]
    SeedingMisconfigured,

    #[error("invalid authentication token: {0}")]
    InvalidToken(String),
}

/// Validates bearer credentials into a [`CurrentUser`]
pub struct Authenticator {
    jwt_secret: Option<String>,
    seeding_api_key: Option<String>,
    admin_user_id: Option<Uuid>,
}

impl Authenticator {
    pub fn new(
        jwt_secret: Option<String>,
        seeding_api_key: Option<String>,
        admin_user_id: Option<Uuid>,
    ) -> Self {
        Self {
            jwt_secret,
            seeding_api_key,
            admin_user_id,
        }
    }

    /// Validate a bearer token. The seeding secret short-circuits to the
    /// configured admin; everything else is an HS256 JWT with audience
    /// `authenticated` and an unexpired `exp`.
    pub fn authenticate(&self, token: &str) -> Result<CurrentUser, AuthError> {
        if let Some(seeding_key) = &self.seeding_api_key {
            if token == seeding_key {
                let admin_id = self.admin_user_id.ok_or(AuthError::SeedingMisconfigured)?;
                tracing::info!(target: "prism::auth", %admin_id, "seeding key authenticated");
                return Ok(CurrentUser {
                    id: admin_id,
                    email: "seeding@localhost".to_string(),
                    role: Role::Admin,
                });
            }
        }

        let secret = self.jwt_secret.as_ref().ok_or(AuthError::NotConfigured)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let id = data
            .claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| AuthError::InvalidToken("subject is not a UUID".to_string()))?;

        let role = match data.claims.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(CurrentUser {
            id,
            email: data.claims.email.unwrap_or_default(),
            role,
        })
    }
}
