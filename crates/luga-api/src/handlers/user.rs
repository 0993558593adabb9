//! Account endpoints under `/api/user`.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use luga_models::{ChatProvider, PlanTier, Quota, SubscriptionStatus, User};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::user::{Registration, Verification};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message: &'static str,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    let outcome = state
        .user_service
        .register(&request.email, &request.password, &request.username)
        .await?;

    Ok(Json(match outcome {
        Registration::Created(user) => RegisterResponse {
            success: true,
            user_id: Some(user.id),
            message: "Please check your email for verification.",
        },
        Registration::EmailTaken => RegisterResponse {
            success: false,
            user_id: None,
            message: "Email already exists.",
        },
    }))
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

/// Email verification link target. Redirects into the web app.
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> ApiResult<Response> {
    let mut target = Url::parse(&state.config.frontend("/login"))
        .map_err(|e| ApiError::internal(format!("Invalid FRONTEND_URL: {}", e)))?;

    match state.user_service.verify_email(&query.token).await? {
        Verification::AlreadyVerified => {}
        Verification::Verified { access_token, email } => {
            target
                .query_pairs_mut()
                .append_pair("token", &access_token)
                .append_pair("email", &email);
        }
    }

    Ok((StatusCode::FOUND, [(header::LOCATION, target.to_string())]).into_response())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

impl TokenResponse {
    fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer",
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let (token, _) = state.user_service.login(&request.email, &request.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.user_service.logout(&request.token).await?;
    Ok(Json(MessageResponse {
        message: "Successfully logged out",
    }))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.user_service.forgot_password(&request.email).await?;
    Ok(Json(MessageResponse {
        message: "If an account exists for this email, a reset code has been sent.",
    }))
}

#[derive(Deserialize)]
pub struct VerifyResetCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct ResetTokenResponse {
    pub reset_token: String,
}

pub async fn verify_reset_code(
    State(state): State<AppState>,
    Json(request): Json<VerifyResetCodeRequest>,
) -> ApiResult<Json<ResetTokenResponse>> {
    let reset_token = state
        .user_service
        .verify_reset_code(&request.email, &request.code)
        .await?;
    Ok(Json(ResetTokenResponse { reset_token }))
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
    pub password: String,
    pub reset_token: String,
}

pub async fn password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .user_service
        .reset_password(&request.email, &request.password, &request.reset_token)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password has been reset successfully",
    }))
}

#[derive(Serialize)]
pub struct FederatedUser {
    pub id: String,
    pub email: String,
    pub username: String,
}

#[derive(Serialize)]
pub struct FederatedLoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: FederatedUser,
}

impl FederatedLoginResponse {
    fn new(access_token: String, user: User) -> Self {
        Self {
            access_token,
            token_type: "bearer",
            user: FederatedUser {
                id: user.id,
                email: user.email,
                username: user.username,
            },
        }
    }
}

#[derive(Deserialize)]
pub struct GoogleLoginRequest {
    pub credential: String,
}

pub async fn google_login(
    State(state): State<AppState>,
    Json(request): Json<GoogleLoginRequest>,
) -> ApiResult<Json<FederatedLoginResponse>> {
    let (token, user) = state.user_service.google_sign_in(&request.credential).await?;
    Ok(Json(FederatedLoginResponse::new(token, user)))
}

#[derive(Deserialize)]
pub struct FacebookLoginRequest {
    pub access_token: String,
}

pub async fn facebook_login(
    State(state): State<AppState>,
    Json(request): Json<FacebookLoginRequest>,
) -> ApiResult<Json<FederatedLoginResponse>> {
    let (token, user) = state.user_service.facebook_sign_in(&request.access_token).await?;
    Ok(Json(FederatedLoginResponse::new(token, user)))
}

/// Plan, expiry and remaining quota.
#[derive(Serialize)]
pub struct BalanceResponse {
    pub subscription_plan: PlanTier,
    pub subscription_status: SubscriptionStatus,
    pub expire_date: Option<DateTime<Utc>>,
    pub balance: Quota,
    pub active_jobs: usize,
}

pub async fn balance(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<BalanceResponse>> {
    let account = state.user_service.get_current(&user.user_id).await?;
    let active_jobs = state.lipsync_jobs.count_active(&user.user_id).await?;

    Ok(Json(BalanceResponse {
        subscription_plan: account.subscription_plan,
        subscription_status: account.subscription_status,
        expire_date: account.expire_date,
        balance: account.quota,
        active_jobs,
    }))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<User>> {
    Ok(Json(state.user_service.get_current(&user.user_id).await?))
}

#[derive(Deserialize)]
pub struct LevelRequest {
    pub level: String,
}

#[derive(Serialize)]
pub struct LevelResponse {
    pub message: &'static str,
    pub level: ChatProvider,
}

/// Choose which chat provider answers this user's prompts.
pub async fn set_level(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<LevelRequest>,
) -> ApiResult<Json<LevelResponse>> {
    let level = ChatProvider::parse(&request.level)
        .ok_or_else(|| ApiError::bad_request("Invalid level. Choose one of: openai, deepseek, grok"))?;
    state.users.set_level(&user.user_id, level).await?;

    Ok(Json(LevelResponse {
        message: "Level updated successfully",
        level,
    }))
}
