//! Chat endpoints under `/api/text`.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use luga_firestore::conversation_repo::MAX_HISTORY;
use luga_models::conversation::{day_counts, group_by_day};
use luga_models::media::new_record_id;
use luga_models::{ConversationEntry, DayCount, DayGroup, HistoryItem, QuotaKind};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{is_valid_record_id, sanitize_prompt, sanitize_title};
use crate::services::ChargeSummary;
use crate::state::AppState;

/// Units charged for an exchange whose title was generated by a second call.
const TITLED_EXCHANGE_COST: i64 = 2;
const EXCHANGE_COST: i64 = 1;

#[derive(Deserialize)]
pub struct ConversationRequest {
    pub prompt: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub response: String,
    pub conversation_id: String,
    pub title: String,
    #[serde(flatten)]
    pub quota: ChargeSummary,
}

fn require_prompt(raw: &str) -> ApiResult<String> {
    let prompt = sanitize_prompt(raw);
    if prompt.is_empty() {
        return Err(ApiError::unprocessable("Prompt cannot be empty"));
    }
    Ok(prompt)
}

/// Answer a prompt and append the exchange to a conversation.
pub async fn conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ConversationRequest>,
) -> ApiResult<Json<ConversationResponse>> {
    let prompt = require_prompt(&request.prompt)?;
    state.quota.ensure(&user.user_id, QuotaKind::Text, EXCHANGE_COST).await?;

    let account = state.user_service.get_current(&user.user_id).await?;
    let provider = account.level;

    let conversation_id = match request.conversation_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => {
            if !is_valid_record_id(id) {
                return Err(ApiError::bad_request("Invalid conversation ID"));
            }
            id.to_string()
        }
        _ => Utc::now().timestamp_millis().to_string(),
    };

    let response = state.providers.chat.complete(provider, &prompt).await?;
    metrics::record_chat_completion(provider.as_str());

    let supplied_title = request
        .title
        .as_deref()
        .map(sanitize_title)
        .filter(|t| !t.is_empty());
    let (title, cost) = match supplied_title {
        Some(title) => (title, EXCHANGE_COST),
        None => (
            state.providers.chat.generate_title(provider, &prompt).await,
            TITLED_EXCHANGE_COST,
        ),
    };

    let entry = ConversationEntry {
        id: new_record_id(),
        user_id: user.user_id.clone(),
        conversation_id,
        title,
        prompt,
        response,
        provider,
        timestamp: Utc::now(),
    };
    state.conversations(&user.user_id).append(&entry).await?;

    let charge = state
        .quota
        .charge(&user.user_id, Some(&account.email), QuotaKind::Text, cost)
        .await?;

    info!(
        user_id = %user.user_id,
        conversation_id = %entry.conversation_id,
        provider = %provider,
        charged = charge.charged,
        "Conversation exchange stored"
    );

    Ok(Json(ConversationResponse {
        response: entry.response,
        conversation_id: entry.conversation_id,
        title: entry.title,
        quota: ChargeSummary::from(&charge),
    }))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(flatten)]
    pub quota: ChargeSummary,
}

/// One-shot completion, not stored in history.
pub async fn generate(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let prompt = require_prompt(&request.prompt)?;
    state.quota.ensure(&user.user_id, QuotaKind::Text, EXCHANGE_COST).await?;

    let account = state.user_service.get_current(&user.user_id).await?;
    let response = state.providers.chat.complete(account.level, &prompt).await?;
    metrics::record_chat_completion(account.level.as_str());

    let charge = state
        .quota
        .charge(&user.user_id, Some(&account.email), QuotaKind::Text, EXCHANGE_COST)
        .await?;

    Ok(Json(GenerateResponse {
        response,
        quota: ChargeSummary::from(&charge),
    }))
}

/// Exchanges grouped by day, newest first.
pub async fn history(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<DayGroup>>> {
    let entries = state.conversations(&user.user_id).list(MAX_HISTORY).await?;
    Ok(Json(group_by_day(&entries)))
}

/// Exchange counts per day.
pub async fn conversations(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<DayCount>>> {
    let entries = state.conversations(&user.user_id).list(MAX_HISTORY).await?;
    Ok(Json(day_counts(&entries)))
}

#[derive(Serialize)]
pub struct ConversationDetail {
    pub conversation_id: String,
    pub title: String,
    pub messages: Vec<HistoryItem>,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ConversationDetail>> {
    if !is_valid_record_id(&conversation_id) {
        return Err(ApiError::bad_request("Invalid conversation ID"));
    }

    let entries = state
        .conversations(&user.user_id)
        .by_conversation(&conversation_id)
        .await?;
    let title = entries
        .first()
        .map(|e| e.title.clone())
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    Ok(Json(ConversationDetail {
        conversation_id,
        title,
        messages: entries.iter().map(HistoryItem::from).collect(),
    }))
}
