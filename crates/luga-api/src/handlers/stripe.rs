//! Checkout and subscription endpoints under `/api/stripe`.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use luga_clients::stripe::{verify_webhook, WEBHOOK_TOLERANCE_SECS};
use luga_clients::{CheckoutSession, Plan};
use luga_models::{PlanTier, SubscriptionStatus};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";
const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

/// Stripe event receiver. Activates the purchased plan on completed checkout.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let secret = state
        .providers
        .stripe
        .webhook_secret()
        .ok_or_else(|| ApiError::internal("STRIPE_WEBHOOK_SECRET not configured"))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid Signature"))?;

    let event = verify_webhook(
        &payload,
        signature,
        secret,
        WEBHOOK_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )?;

    if event.event_type != CHECKOUT_COMPLETED {
        info!(event_type = %event.event_type, "Ignoring Stripe event");
        return Ok(Json(WebhookAck { status: "Success" }));
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object)
        .map_err(|_| ApiError::bad_request("Invalid Payload"))?;

    let plan_name = session.metadata.get("name").map(String::as_str).unwrap_or_default();
    let Some(tier) = PlanTier::parse(plan_name).filter(PlanTier::is_paid) else {
        warn!(session_id = %session.id, plan = %plan_name, "Checkout for unknown plan");
        return Ok(Json(WebhookAck { status: "Success" }));
    };
    let Some(email) = session.email() else {
        warn!(session_id = %session.id, "Checkout without customer email");
        return Ok(Json(WebhookAck { status: "Success" }));
    };

    if !state.stripe_events.claim(&event.id, &event.event_type).await? {
        info!(event_id = %event.id, "Duplicate Stripe delivery");
        return Ok(Json(WebhookAck { status: "Success" }));
    }
    if let Err(e) = state.user_service.activate_plan(email, tier).await {
        if let Err(release) = state.stripe_events.release(&event.id).await {
            warn!(event_id = %event.id, error = %release, "Failed to release Stripe event");
        }
        return Err(e);
    }
    Ok(Json(WebhookAck { status: "Success" }))
}

/// Checkout request. The plan comes from `priceId`; any client `name` is ignored.
#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    #[serde(rename = "priceId")]
    pub price_id: String,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let price_id = request.price_id.trim();
    if price_id.is_empty() {
        return Err(ApiError::bad_request("priceId is required"));
    }

    let plans = state.providers.stripe.list_plans().await?;
    let tier = plans
        .iter()
        .find(|plan| plan.offers(price_id))
        .and_then(|plan| PlanTier::parse(&plan.name))
        .filter(PlanTier::is_paid)
        .ok_or_else(|| ApiError::bad_request("Unknown priceId"))?;

    let session = state
        .providers
        .stripe
        .create_checkout_session(request.email.trim(), tier.display_name(), price_id)
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

pub async fn subscription_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    Ok(Json(state.providers.stripe.list_plans().await?))
}

#[derive(Serialize)]
pub struct SubscriptionStatusResponse {
    pub subscription_status: SubscriptionStatus,
    pub subscription_plan: PlanTier,
    pub expire_date: Option<DateTime<Utc>>,
}

pub async fn subscription_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    let account = state.user_service.get_current(&user.user_id).await?;
    Ok(Json(SubscriptionStatusResponse {
        subscription_status: account.subscription_status,
        subscription_plan: account.subscription_plan,
        expire_date: account.expire_date,
    }))
}

#[derive(Deserialize)]
pub struct VerifyPaymentQuery {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct PaymentStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Query(query): Query<VerifyPaymentQuery>,
) -> ApiResult<Json<PaymentStatus>> {
    let session = state.providers.stripe.retrieve_session(&query.session_id).await?;

    Ok(Json(if session.is_paid() {
        PaymentStatus {
            status: "success",
            email: session.email().map(str::to_string),
        }
    } else {
        PaymentStatus {
            status: "pending",
            email: None,
        }
    }))
}
