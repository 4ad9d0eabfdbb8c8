//! # Accounts & OTP Login
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/accounts/register` | `register` (public) |
//! | `POST` | `/v1/accounts/login` | `login` (public) |
//! | `POST` | `/v1/accounts/otp/verify` | `verify_otp` (public) |
//! | `POST` | `/v1/accounts/logout` | `logout` |
//! | `GET` | `/v1/accounts/me` | `me` |
//! | `GET` | `/v1/accounts/dashboard` | `dashboard` |
//!
//! OTP delivery is mocked: the code is returned in the response body. A
//! challenge is the id of the OTP request it was issued with.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use umeed_core::{EmailAddress, PhoneNumber};

use crate::auth::{issue_session, revoke_session, CallerIdentity, IssuedSession, Role, SessionToken};
use crate::credentials::{generate_otp_code, otp_matches, verify_password, MIN_PASSWORD_LEN};
use crate::db::Record;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, require_text, Validate};
use crate::model::{OtpRequestRecord, UserRecord};
use crate::orchestration::{self, NewUser};
use crate::state::AppState;

// -- Request / response types --------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub phone_number: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// One of `donor`, `buyer`, `both`, `repair_partner`.
    pub role: String,
    pub password: String,
    pub password_confirm: String,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("username", &self.username, 150)?;
        if self.username.chars().any(char::is_whitespace) {
            return Err("username must not contain whitespace".to_string());
        }
        match Role::from_name(&self.role) {
            None => return Err(format!("unknown role '{}'", self.role)),
            Some(Role::Admin) => return Err("admin accounts cannot self-register".to_string()),
            Some(_) => {}
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        if self.password != self.password_confirm {
            return Err("passwords do not match".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyOtpRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

/// A pending OTP challenge. `code` is the mock delivery.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpChallenge {
    pub challenge_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub session: IssuedSession,
    pub user: UserRecord,
    pub landing_area: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub role: Role,
    pub landing_area: String,
}

// -- Routers -------------------------------------------------------------------

/// Unauthenticated account routes.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/accounts/register", post(register))
        .route("/v1/accounts/login", post(login))
        .route("/v1/accounts/otp/verify", post(verify_otp))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/accounts/logout", post(logout))
        .route("/v1/accounts/me", get(me))
        .route("/v1/accounts/dashboard", get(dashboard))
}

// -- OTP helpers ---------------------------------------------------------------

/// Issue a fresh challenge. Supersedes the user's earlier challenges and
/// drops every expired one.
fn issue_otp_challenge(state: &AppState, user_id: Uuid) -> OtpChallenge {
    let now = Utc::now();
    let ttl = Duration::seconds(state.config.otp_ttl_secs);
    let pruned = state
        .otp_requests
        .retain(|o| o.user_id != user_id && o.created_at + ttl > now);

    let otp = OtpRequestRecord {
        id: Uuid::new_v4(),
        user_id,
        code: generate_otp_code(),
        created_at: now,
        is_used: false,
    };
    state.otp_requests.insert(otp.id, otp.clone());
    tracing::info!(%user_id, challenge_id = %otp.id, pruned, "OTP challenge issued");
    OtpChallenge {
        challenge_id: otp.id,
        expires_at: otp.created_at + Duration::seconds(state.config.otp_ttl_secs),
        code: otp.code,
    }
}

fn no_otp_pending() -> AppError {
    AppError::Unauthorized("No OTP pending".to_string())
}

// -- Handlers ------------------------------------------------------------------

/// POST /v1/accounts/register — Create an account and start OTP verification.
#[utoipa::path(
    post,
    path = "/v1/accounts/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; OTP challenge issued", body = OtpChallenge),
        (status = 409, description = "Username or phone number taken", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "accounts"
)]
async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OtpChallenge>), AppError> {
    let req = extract_validated_json(body)?;
    let role = Role::from_name(&req.role)
        .ok_or_else(|| AppError::Validation(format!("unknown role '{}'", req.role)))?;

    let user = orchestration::create_user(
        &state,
        NewUser {
            username: req.username.trim().to_string(),
            email: EmailAddress::new(req.email)?,
            phone_number: PhoneNumber::new(req.phone_number)?,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            role,
            password: req.password,
            otp_verified: false,
            is_staff: false,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(issue_otp_challenge(&state, user.id))))
}

/// POST /v1/accounts/login — Password login.
///
/// Unverified accounts receive a fresh OTP challenge instead of a session.
#[utoipa::path(
    post,
    path = "/v1/accounts/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 202, description = "OTP verification required", body = OtpChallenge),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
    ),
    tag = "accounts"
)]
async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    let username = req.username.trim();

    let user = state
        .users
        .find(|u| u.username == username)
        .filter(|u| u.is_active && verify_password(&req.password, &u.password_hash))
        .ok_or_else(|| {
            tracing::warn!(username, "login failed");
            AppError::Unauthorized("invalid username or password".to_string())
        })?;

    if !user.otp_verified {
        let challenge = issue_otp_challenge(&state, user.id);
        return Ok((StatusCode::ACCEPTED, Json(challenge)).into_response());
    }

    let session = issue_session(&state, user.id);
    Ok(Json(LoginResponse {
        session,
        landing_area: user.role.landing_area().to_string(),
        user,
    })
    .into_response())
}

/// POST /v1/accounts/otp/verify — Complete an OTP challenge.
#[utoipa::path(
    post,
    path = "/v1/accounts/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Verified and logged in", body = LoginResponse),
        (status = 401, description = "No OTP pending", body = crate::error::ErrorBody),
        (status = 422, description = "Wrong code", body = crate::error::ErrorBody),
    ),
    tag = "accounts"
)]
async fn verify_otp(
    State(state): State<AppState>,
    body: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let req = extract_json(body)?;
    let ttl = Duration::seconds(state.config.otp_ttl_secs);

    let otp = state
        .otp_requests
        .get(&req.challenge_id)
        .filter(|o| !o.is_used && o.created_at + ttl > Utc::now())
        .ok_or_else(no_otp_pending)?;

    if !otp_matches(&req.code, &otp.code) {
        tracing::warn!(user_id = %otp.user_id, "OTP mismatch");
        return Err(AppError::Validation(
            "invalid OTP, use the code from the challenge".to_string(),
        ));
    }

    let user = state
        .users
        .update(&otp.user_id, |u| {
            u.otp_verified = true;
            u.updated_at = Utc::now();
        })
        .ok_or_else(no_otp_pending)?;
    let (user_id, code) = (otp.user_id, otp.code);
    state
        .otp_requests
        .update_where(|o| o.user_id == user_id && o.code == code, |o| o.is_used = true);
    state.persist(Record::User(&user)).await?;
    tracing::info!(%user_id, "phone verified");

    let session = issue_session(&state, user.id);
    Ok(Json(LoginResponse {
        session,
        landing_area: user.role.landing_area().to_string(),
        user,
    }))
}

/// POST /v1/accounts/logout — Revoke the current session.
#[utoipa::path(
    post,
    path = "/v1/accounts/logout",
    responses((status = 204, description = "Logged out")),
    tag = "accounts"
)]
async fn logout(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Extension(token): Extension<SessionToken>,
) -> StatusCode {
    revoke_session(&state, &token.0);
    tracing::info!(user_id = %caller.user_id, "logged out");
    StatusCode::NO_CONTENT
}

/// GET /v1/accounts/me — The caller's profile.
#[utoipa::path(
    get,
    path = "/v1/accounts/me",
    responses((status = 200, description = "Current user", body = UserRecord)),
    tag = "accounts"
)]
async fn me(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<UserRecord>, AppError> {
    state
        .users
        .get(&caller.user_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("user", caller.user_id))
}

/// GET /v1/accounts/dashboard — Where the caller's role lands.
#[utoipa::path(
    get,
    path = "/v1/accounts/dashboard",
    responses((status = 200, description = "Landing area", body = DashboardResponse)),
    tag = "accounts"
)]
async fn dashboard(caller: CallerIdentity) -> Json<DashboardResponse> {
    Json(DashboardResponse {
        role: caller.role,
        landing_area: caller.role.landing_area().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_req(role: &str) -> RegisterRequest {
        RegisterRequest {
            username: "asha".into(),
            email: "asha@example.org".into(),
            phone_number: "9876543210".into(),
            first_name: String::new(),
            last_name: String::new(),
            role: role.into(),
            password: "longenough".into(),
            password_confirm: "longenough".into(),
        }
    }

    #[test]
    fn register_validation() {
        assert!(register_req("donor").validate().is_ok());
        assert!(register_req("admin").validate().is_err());
        assert!(register_req("wizard").validate().is_err());

        let mut short = register_req("buyer");
        short.password = "short".into();
        short.password_confirm = "short".into();
        assert!(short.validate().is_err());

        let mut mismatch = register_req("buyer");
        mismatch.password_confirm = "different1".into();
        assert_eq!(mismatch.validate().unwrap_err(), "passwords do not match");
    }

    #[test]
    fn challenge_expiry_follows_config() {
        let state = AppState::new();
        let user = Uuid::new_v4();
        let c = issue_otp_challenge(&state, user);
        assert_eq!(c.code.len(), 6);
        let otp = state.otp_requests.get(&c.challenge_id).unwrap();
        assert_eq!(otp.user_id, user);
        assert_eq!(
            c.expires_at,
            otp.created_at + Duration::seconds(state.config.otp_ttl_secs)
        );
    }

    #[test]
    fn new_challenge_supersedes_and_prunes() {
        let state = AppState::new();
        let (user, other) = (Uuid::new_v4(), Uuid::new_v4());
        let ttl = Duration::seconds(state.config.otp_ttl_secs + 1);

        let stale = issue_otp_challenge(&state, other);
        state
            .otp_requests
            .update(&stale.challenge_id, |o| o.created_at = o.created_at - ttl);
        let live = issue_otp_challenge(&state, other);

        for _ in 0..50 {
            issue_otp_challenge(&state, user);
        }
        let latest = issue_otp_challenge(&state, user);

        assert_eq!(state.otp_requests.len(), 2);
        assert!(state.otp_requests.contains(&latest.challenge_id));
        assert!(state.otp_requests.contains(&live.challenge_id));
        assert!(!state.otp_requests.contains(&stale.challenge_id));
    }
}
