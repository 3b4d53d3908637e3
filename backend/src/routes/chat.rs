// backend/src/routes/chat.rs
//
// The client opens one conversation and posts user messages; each message
// streams its turn events back over SSE. Axum's SSE keep-alive doubles as
// the ping frame clients must ignore.

use crate::errors::AppError;
use crate::routes::authenticate;
use crate::services::orchestrator::TurnEvent;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

#[derive(Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default = "default_agent")]
    pub agent: String,
}

fn default_agent() -> String {
    "faa".to_string()
}

fn sse_event(event: &TurnEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(payload) => Event::default().data(payload),
        Err(e) => {
            error!(error = %e, "Failed to serialize turn event");
            Event::default().data(r#"{"type":"error","classification":"internal","content":"event serialization failed"}"#)
        }
    }
}

/// One user turn. Emits the turn's event stream; `done` and `error` are the
/// mutually exclusive terminals, with a `quota_update` preceding `done` for
/// quota-tracked visitors.
#[instrument(skip(state, headers, req), fields(%conversation_id, agent = %query.agent))]
pub async fn post_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
    Json(req): Json<ChatMessageRequest>,
) -> Result<Response, AppError> {
    let visitor = authenticate(&state, &headers)?;
    let agent = state
        .agents
        .get(&query.agent)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown agent '{}'", query.agent)))?;

    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("Empty message".to_string()));
    }

    // Quota is checked before any turn work begins.
    if !visitor.is_admin {
        let fingerprint = visitor
            .fingerprint
            .as_deref()
            .ok_or(AppError::AuthInvalid)?;
        let status = state.quota.check(fingerprint).await?;
        if !status.allowed {
            info!("Rejecting turn: daily quota exhausted");
            return Err(AppError::QuotaExhausted);
        }
    }

    let session = state.sessions.get_or_create(&conversation_id)?;

    // One turn at a time per conversation; a second concurrent turn is
    // rejected with a warning rather than queued.
    let Ok(turn_guard) = session.turn_gate.clone().try_lock_owned() else {
        warn!("Rejecting concurrent turn on conversation");
        let stream = async_stream::stream! {
            yield Ok::<_, AppError>(sse_event(&TurnEvent::Warning {
                content: "A turn is already in progress for this conversation.".to_string(),
            }));
            yield Ok(sse_event(&TurnEvent::Error {
                classification: "conflict".to_string(),
                content: "Concurrent turns on one conversation are not permitted; wait for the current response to finish.".to_string(),
            }));
        };
        return Ok(Sse::new(stream).into_response());
    };

    info!("Starting turn");
    let mut rx = state.orchestrator.handle_turn(
        agent,
        conversation_id.clone(),
        req.message,
        visitor.fingerprint.clone(),
        session.memo.clone(),
    );

    let quota = state.quota.clone();
    let fingerprint = visitor.fingerprint.clone();
    let is_admin = visitor.is_admin;

    let stream = async_stream::stream! {
        // Held for the turn's duration; dropped when the stream ends.
        let _turn_guard = turn_guard;

        while let Some(event) = rx.recv().await {
            match &event {
                TurnEvent::Done => {
                    if !is_admin {
                        if let Some(fingerprint) = &fingerprint {
                            match quota.debit(fingerprint).await {
                                Ok(status) => {
                                    yield Ok::<_, AppError>(sse_event(&TurnEvent::QuotaUpdate {
                                        requests_used: status.used,
                                        requests_remaining: status.remaining,
                                        daily_limit: status.daily_limit,
                                    }));
                                }
                                Err(e) => warn!(error = %e, "Failed to debit quota"),
                            }
                        }
                    }
                    yield Ok(sse_event(&event));
                    break;
                }
                TurnEvent::Error { .. } => {
                    yield Ok(sse_event(&event));
                    break;
                }
                _ => yield Ok(sse_event(&event)),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// Conversation history for reconnection; returns turns in ascending
/// sequence.
#[instrument(skip(state, headers), fields(%conversation_id))]
pub async fn get_turns(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authenticate(&state, &headers)?;
    let turns = state.store.load_turns(&conversation_id).await?;
    Ok(Json(turns))
}

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/{conversation_id}/message", post(post_message))
        .route("/{conversation_id}/turns", get(get_turns))
}
