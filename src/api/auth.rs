use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ErrorCode, ValidationErrorBuilder};
use super::users::user_response;
use super::validation::{validate_gender, validate_preferred_contact};
use crate::config::AuthConfig;
use crate::db::{now_timestamp, GoogleAuthRequest, LoginResponse, User, UserResponse};
use crate::AppState;

/// What the identity provider vouches for
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

/// Verifies identity tokens issued by the external identity provider
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<IdentityClaims>;
}

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Verifies Google ID tokens through the token-info endpoint
pub struct GoogleVerifier {
    http: reqwest::Client,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    iss: String,
    email: String,
    #[serde(default)]
    email_verified: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl GoogleVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        if client_id.is_none() {
            warn!("auth.google_client_id is not set; identity tokens are accepted for any audience");
        }
        Self {
            http: reqwest::Client::new(),
            client_id,
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<IdentityClaims> {
        let response = self
            .http
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", token)])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("identity provider rejected the token ({})", response.status());
        }
        let info: TokenInfo = response.json().await?;

        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            anyhow::bail!("unexpected token issuer {}", info.iss);
        }
        if let Some(client_id) = &self.client_id {
            if &info.aud != client_id {
                anyhow::bail!("token was issued for another client");
            }
        }

        let name = info
            .name
            .unwrap_or_else(|| info.email.split('@').next().unwrap_or_default().to_string());
        Ok(IdentityClaims {
            email_verified: info.email_verified.as_deref() == Some("true"),
            email: info.email,
            name,
        })
    }
}

/// Session token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(config: &AuthConfig, user: &User) -> Result<String, ApiError> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::days(config.token_ttl_days)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("Failed to sign session token: {}", e)))
}

pub fn decode_token(config: &AuthConfig, token: &str) -> Result<Claims, ApiError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthorized("Invalid or expired session"))
}

fn email_in_domain(email: &str, domain: &str) -> bool {
    email
        .rsplit_once('@')
        .is_some_and(|(local, d)| !local.is_empty() && d.eq_ignore_ascii_case(domain))
}

/// Log in with an identity token, registering the user on first use
pub async fn google_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GoogleAuthRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    if req.token.trim().is_empty() {
        return Err(ApiError::validation_field("token", "Identity token is required"));
    }

    let identity = state.identity.verify(req.token.trim()).await.map_err(|e| {
        warn!("Identity verification failed: {}", e);
        ApiError::unauthorized("Identity token could not be verified")
    })?;

    let domain = &state.config.auth.allowed_email_domain;
    if !identity.email_verified || !email_in_domain(&identity.email, domain) {
        warn!(email = %identity.email, "Sign-in from outside the allowed domain");
        return Err(ApiError::new(
            ErrorCode::NotAuthorized,
            format!("Only verified @{} accounts can sign in", domain),
        ));
    }
    let email = identity.email.to_lowercase();

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if let Some(user) = existing {
        let token = issue_token(&state.config.auth, &user)?;
        info!(user_id = %user.id, "User logged in");
        return Ok((
            StatusCode::OK,
            Json(LoginResponse {
                token,
                user: user_response(&state.db, user).await?,
                is_new_user: false,
            }),
        ));
    }

    // Registration needs the profile fields the identity provider does not supply
    let mut errors = ValidationErrorBuilder::new();
    match req.gender {
        Some(gender) => {
            if let Err(e) = validate_gender(gender) {
                errors.add("gender", e);
            }
        }
        None => {
            errors.add("gender", "Gender is required to register");
        }
    }
    let preferred_contact = req.preferred_contact.unwrap_or_default();
    if let Err(e) = validate_preferred_contact(&preferred_contact) {
        errors.add("preferred_contact", e);
    }
    errors.finish()?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_timestamp();
    let is_system_admin = state.config.auth.is_admin_email(&email);
    sqlx::query(
        "INSERT INTO users (id, email, name, gender, preferred_contact, is_system_admin, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(identity.name.trim())
    .bind(req.gender.unwrap_or_default())
    .bind(preferred_contact.trim())
    .bind(is_system_admin)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;
    let token = issue_token(&state.config.auth, &user)?;
    info!(user_id = %user.id, is_system_admin, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            user: user_response(&state.db, user).await?,
            is_new_user: true,
        }),
    ))
}

pub async fn me(user: User, State(state): State<Arc<AppState>>) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(user_response(&state.db, user).await?))
}

/// Issue a fresh session token for the current user
pub async fn refresh(
    user: User,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = issue_token(&state.config.auth, &user)?;
    Ok(Json(LoginResponse {
        token,
        user: user_response(&state.db, user).await?,
        is_new_user: false,
    }))
}

/// Extract the bearer token from request headers
fn extract_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let claims = decode_token(&state.config.auth, token)?;

        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(&state.db)
            .await?;
        user.ok_or_else(|| ApiError::unauthorized("Account no longer exists"))
    }
}
