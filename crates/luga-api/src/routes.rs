//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{clone, health, ready, root, stripe, text, user, video, voice};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache};
use crate::state::AppState;

/// Requests per second per IP on credential endpoints.
const AUTH_RATE_LIMIT_RPS: u32 = 5;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Credential endpoints get a tighter limit against brute force.
    let credential_routes = Router::new()
        .route("/register", post(user::register))
        .route("/login", post(user::login))
        .route("/forgot-password", post(user::forgot_password))
        .route("/verify-reset-code", post(user::verify_reset_code))
        .route("/password-reset", post(user::password_reset))
        .layer(middleware::from_fn_with_state(
            Arc::new(RateLimiterCache::new(AUTH_RATE_LIMIT_RPS)),
            rate_limit_middleware,
        ));

    let user_routes = Router::new()
        .merge(credential_routes)
        .route("/verify", get(user::verify))
        .route("/logout", post(user::logout))
        .route("/auth/google", post(user::google_login))
        .route("/auth/facebook", post(user::facebook_login))
        .route("/balance", get(user::balance).post(user::balance))
        .route("/me", get(user::me))
        .route("/level", post(user::set_level));

    let text_routes = Router::new()
        .route("/conversation", post(text::conversation))
        .route("/generate", post(text::generate))
        .route("/history", post(text::history))
        .route("/conversations", get(text::conversations))
        .route("/conversation/:conversation_id", get(text::get_conversation));

    let voice_routes = Router::new()
        .route("/voices", get(voice::list_voices))
        .route("/text-to-speech", post(voice::text_to_speech))
        .route("/audio", get(voice::list_audio))
        .route("/update-audio-name", post(voice::update_audio_name))
        .route("/upload-voice", post(voice::upload_voice))
        .route("/upload-document", post(voice::upload_document));

    let clone_routes = Router::new()
        .route("/clone-voice", post(clone::clone_voice))
        .route("/voices", get(clone::list_cloned_voices))
        .route("/generate-preview", post(clone::generate_preview));

    let video_routes = Router::new()
        .route("/upload-audio", post(video::upload_audio))
        .route("/get-audio", post(video::get_audio))
        .route("/upload-video", post(video::upload_video))
        .route("/sync-audio", post(video::sync_audio))
        .route("/job/:video_id", get(video::get_job_status).delete(video::delete_job))
        .route("/jobs", get(video::list_jobs))
        .route("/placeholder/:width/:height", get(video::placeholder));

    let stripe_routes = Router::new()
        .route("/subs", post(stripe::create_subscription))
        .route("/subscription_plans", get(stripe::subscription_plans))
        .route("/subscription_status", get(stripe::subscription_status))
        .route("/verify-payment", get(stripe::verify_payment));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .nest("/user", user_routes)
        .nest("/text", text_routes)
        .nest("/voice", voice_routes)
        .nest("/clone", clone_routes)
        .nest("/video", video_routes)
        .nest("/stripe", stripe_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    // Provider callbacks are not rate limited; they authenticate by signature.
    let webhook_routes = Router::new()
        .route("/video/sync-webhook", post(video::sync_webhook))
        .route("/stripe/stripe-webhook", post(stripe::stripe_webhook));

    let health_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes.merge(webhook_routes))
        .merge(health_routes)
        .merge(metrics_routes)
        // Uploads go up to the configured limit rather than axum's 2 MB default.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
