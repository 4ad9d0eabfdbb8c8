//! # Authentication & Authorization
//!
//! Session-based bearer authentication with role-based access control.
//!
//! ## Sessions
//!
//! A successful login (or OTP verification) issues an opaque token. Clients
//! send it as `Authorization: Bearer <token>`. The server keeps only the
//! token's SHA-256 digest, mapped to the user and an expiry.
//!
//! ## CallerIdentity
//!
//! [`auth_middleware`] resolves the session, reloads the user, and injects a
//! [`CallerIdentity`] into request extensions. Handlers extract it through
//! the `FromRequestParts` impl and gate on roles with [`require_role`].

use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::credentials::{generate_session_token, token_digest};
use crate::error::{AppError, ErrorBody, ErrorDetail};
use crate::state::{AppState, SessionRecord};

// ── Role ────────────────────────────────────────────────────────────────────

/// Account roles. Roles are a set, not a ladder: a buyer cannot do what a
/// donor does, and `both` combines the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Donor,
    Buyer,
    Both,
    RepairPartner,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Self::Donor,
        Self::Buyer,
        Self::Both,
        Self::RepairPartner,
        Self::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donor => "donor",
            Self::Buyer => "buyer",
            Self::Both => "both",
            Self::RepairPartner => "repair_partner",
            Self::Admin => "admin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == name)
    }

    /// The area a user of this role lands on after login.
    pub fn landing_area(&self) -> &'static str {
        match self {
            Self::Donor => "my_devices",
            Self::Buyer => "marketplace",
            Self::Both => "dashboard",
            Self::RepairPartner => "repairs",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub role: Role,
    /// Staff accounts pass every admin gate regardless of role.
    pub is_staff: bool,
}

impl CallerIdentity {
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed
            .iter()
            .any(|r| *r == self.role || (*r == Role::Admin && self.is_staff))
    }

    pub fn is_admin(&self) -> bool {
        self.has_any_role(&[Role::Admin])
    }
}

/// The raw bearer token of the current request, kept so logout can revoke it.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// 403 unless the caller holds one of `allowed`.
pub fn require_role(caller: &CallerIdentity, allowed: &[Role]) -> Result<(), AppError> {
    if caller.has_any_role(allowed) {
        Ok(())
    } else {
        let names: Vec<&str> = allowed.iter().map(Role::as_str).collect();
        Err(AppError::Forbidden(format!(
            "one of roles [{}] required, caller has '{}'",
            names.join(", "),
            caller.role.as_str()
        )))
    }
}

pub fn require_admin(caller: &CallerIdentity) -> Result<(), AppError> {
    require_role(caller, &[Role::Admin])
}

// ── Sessions ────────────────────────────────────────────────────────────────

/// A newly issued session, returned to the client once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issue a session for `user_id`. Expired sessions of every user are swept
/// while the map is locked.
pub fn issue_session(state: &AppState, user_id: Uuid) -> IssuedSession {
    let token = generate_session_token();
    let issued_at = Utc::now();
    let expires_at = issued_at + Duration::seconds(state.config.session_ttl_secs);

    let mut sessions = state.sessions.write();
    let before = sessions.len();
    sessions.retain(|_, s| s.expires_at > issued_at);
    let swept = before - sessions.len();
    sessions.insert(
        token_digest(&token),
        SessionRecord {
            user_id,
            issued_at,
            expires_at,
        },
    );
    drop(sessions);

    tracing::info!(%user_id, %expires_at, swept, "session issued");
    IssuedSession { token, expires_at }
}

/// The user behind a live session. Expired sessions are dropped on sight.
pub fn resolve_session(state: &AppState, token: &str) -> Option<Uuid> {
    let key = token_digest(token);
    let now = Utc::now();
    let mut sessions = state.sessions.write();
    match sessions.get(&key) {
        Some(s) if s.expires_at > now => Some(s.user_id),
        Some(_) => {
            sessions.remove(&key);
            None
        }
        None => None,
    }
}

pub fn revoke_session(state: &AppState, token: &str) -> bool {
    state.sessions.write().remove(&token_digest(token)).is_some()
}

/// Drop every session of a user, e.g. after deactivation.
pub fn revoke_user_sessions(state: &AppState, user_id: Uuid) -> usize {
    let mut sessions = state.sessions.write();
    let before = sessions.len();
    sessions.retain(|_, s| s.user_id != user_id);
    before - sessions.len()
}

// ── Middleware ───────────────────────────────────────────────────────────────

fn bearer_token(request: &Request) -> Result<String, &'static str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or("missing authorization header")?
        .to_str()
        .map_err(|_| "authorization header is not valid ASCII")?;
    value
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or("authorization header must use Bearer scheme")
}

/// Resolve the bearer session and inject [`CallerIdentity`].
///
/// Rejects unknown or expired sessions and inactive accounts with 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Ok(t) => t,
        Err(msg) => {
            tracing::warn!(reason = msg, "authentication failed");
            return unauthorized_response(msg);
        }
    };

    let Some(user_id) = resolve_session(&state, &token) else {
        tracing::warn!("authentication failed: unknown or expired session");
        return unauthorized_response("session is invalid or has expired");
    };

    match state.users.get(&user_id) {
        Some(user) if user.is_active => {
            request.extensions_mut().insert(CallerIdentity {
                user_id,
                role: user.role,
                is_staff: user.is_staff,
            });
            request.extensions_mut().insert(SessionToken(token));
            next.run(request).await
        }
        Some(_) => {
            tracing::warn!(%user_id, "authentication failed: account inactive");
            unauthorized_response("account is inactive")
        }
        None => {
            tracing::warn!(%user_id, "authentication failed: session user no longer exists");
            unauthorized_response("session is invalid or has expired")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserRecord;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use umeed_core::{EmailAddress, PhoneNumber};

    fn add_user(state: &AppState, role: Role, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        state.users.insert(
            id,
            UserRecord {
                id,
                username: format!("user-{id}"),
                email: EmailAddress::new("u@example.org").unwrap(),
                phone_number: PhoneNumber::new("9876543210").unwrap(),
                first_name: String::new(),
                last_name: String::new(),
                role,
                password_hash: String::new(),
                otp_verified: true,
                is_active: active,
                is_staff: false,
                date_joined: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|caller: CallerIdentity| async move {
                    format!("{}:{}", caller.user_id, caller.role)
                }),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn get_with(token: Option<&str>) -> axum::http::Request<Body> {
        let mut b = axum::http::Request::builder().uri("/whoami");
        if let Some(t) = token {
            b = b.header("authorization", format!("Bearer {t}"));
        }
        b.body(Body::empty()).unwrap()
    }

    // ── Roles ────────────────────────────────────────────────────────

    #[test]
    fn role_names_and_landing_areas() {
        for role in Role::ALL {
            assert_eq!(Role::from_name(role.as_str()), Some(role));
        }
        assert_eq!(Role::Donor.landing_area(), "my_devices");
        assert_eq!(Role::Buyer.landing_area(), "marketplace");
        assert_eq!(Role::Both.landing_area(), "dashboard");
        assert_eq!(Role::Admin.landing_area(), "admin");
        assert_eq!(Role::RepairPartner.landing_area(), "repairs");
        assert_eq!(Role::from_name("superuser"), None);
    }

    #[test]
    fn require_role_is_set_membership() {
        let donor = CallerIdentity {
            user_id: Uuid::new_v4(),
            role: Role::Donor,
            is_staff: false,
        };
        assert!(require_role(&donor, &[Role::Donor, Role::Both]).is_ok());
        assert!(matches!(
            require_role(&donor, &[Role::Buyer]),
            Err(AppError::Forbidden(_))
        ));
        assert!(require_admin(&donor).is_err());
    }

    #[test]
    fn staff_pass_admin_gates() {
        let staff = CallerIdentity {
            user_id: Uuid::new_v4(),
            role: Role::Buyer,
            is_staff: true,
        };
        assert!(staff.is_admin());
        assert!(require_role(&staff, &[Role::Donor, Role::Admin]).is_ok());
        assert!(require_role(&staff, &[Role::RepairPartner]).is_err());
    }

    // ── Sessions ─────────────────────────────────────────────────────

    #[test]
    fn issued_session_resolves_until_revoked() {
        let state = AppState::new();
        let user = Uuid::new_v4();
        let s = issue_session(&state, user);
        assert_eq!(resolve_session(&state, &s.token), Some(user));
        assert!(revoke_session(&state, &s.token));
        assert_eq!(resolve_session(&state, &s.token), None);
        assert!(!revoke_session(&state, &s.token));
    }

    #[test]
    fn expired_session_is_dropped() {
        let state = AppState::new();
        let user = Uuid::new_v4();
        let s = issue_session(&state, user);
        for rec in state.sessions.write().values_mut() {
            rec.expires_at = Utc::now() - Duration::seconds(1);
        }
        assert_eq!(resolve_session(&state, &s.token), None);
        assert!(state.sessions.read().is_empty());
    }

    #[test]
    fn issuing_sweeps_expired_sessions() {
        let state = AppState::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let stale = issue_session(&state, a);
        issue_session(&state, a);
        for rec in state.sessions.write().values_mut() {
            rec.expires_at = Utc::now() - Duration::seconds(1);
        }
        let fresh = issue_session(&state, b);
        assert_eq!(state.sessions.read().len(), 1);
        assert_eq!(resolve_session(&state, &fresh.token), Some(b));
        assert_eq!(resolve_session(&state, &stale.token), None);
    }

    #[test]
    fn revoke_user_sessions_only_touches_that_user() {
        let state = AppState::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        issue_session(&state, a);
        issue_session(&state, a);
        let keep = issue_session(&state, b);
        assert_eq!(revoke_user_sessions(&state, a), 2);
        assert_eq!(resolve_session(&state, &keep.token), Some(b));
    }

    // ── Middleware ───────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_session_injects_identity() {
        let state = AppState::new();
        let user = add_user(&state, Role::Buyer, true);
        let s = issue_session(&state, user);
        let resp = test_app(state).oneshot(get_with(Some(&s.token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(std::str::from_utf8(&body).unwrap(), format!("{user}:buyer"));
    }

    #[tokio::test]
    async fn missing_header_is_401() {
        let resp = test_app(AppState::new()).oneshot(get_with(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_token_is_401() {
        let resp = test_app(AppState::new())
            .oneshot(get_with(Some("deadbeef")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_401() {
        let req = axum::http::Request::builder()
            .uri("/whoami")
            .header("authorization", "Basic dXNlcjpwdw==")
            .body(Body::empty())
            .unwrap();
        let resp = test_app(AppState::new()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inactive_account_is_401() {
        let state = AppState::new();
        let user = add_user(&state, Role::Donor, false);
        let s = issue_session(&state, user);
        let resp = test_app(state).oneshot(get_with(Some(&s.token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn handler_without_middleware_rejects_extraction() {
        let app: Router = Router::new().route(
            "/whoami",
            get(|caller: CallerIdentity| async move { caller.role.to_string() }),
        );
        let resp = app.oneshot(get_with(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
