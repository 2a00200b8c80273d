//! Legacy dual-endpoint binding.
//!
//! `GET {legacy_sse_path}` opens a stream whose first record names the submit
//! endpoint; `POST {legacy_message_path}?sessionId=...` submits messages.
//! Replies only ever travel over the stream; the POST is acknowledged with
//! 202 before the handler runs.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use switchyard_core::ids::SessionId;

use crate::config::ReplyMode;
use crate::dispatcher::Dispatcher;
use crate::negotiate::{self, Rejection};
use crate::registry::Variant;
use crate::server::AppState;
use crate::writer::{self, StreamRecord};

pub const SESSION_ID_PARAM: &str = "sessionId";

/// Stream-open endpoint.
pub async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let supported = &state.config.protocol_version;
    if let Err(rejection) = negotiate::check_version(&headers, supported, false) {
        return rejection.into_response();
    }

    let session = state.lifecycle.open_session(Variant::Legacy, ReplyMode::Stream);
    let endpoint = format!(
        "{}?{}={}",
        state.config.legacy_message_path, SESSION_ID_PARAM, session.id
    );

    match session
        .writer()
        .open(Some(StreamRecord::endpoint(endpoint)), state.config.keep_alive())
    {
        Ok(stream) => writer::stream_response(stream, None),
        Err(e) => {
            tracing::error!(session_id = %session.id, error = %e, "Failed to open legacy stream");
            state.lifecycle.terminate(&session.id);
            Rejection::internal("failed to open stream").into_response()
        }
    }
}

/// Submit endpoint.
pub async fn submit(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(raw_id) = query.get(SESSION_ID_PARAM).filter(|s| !s.is_empty()) else {
        return Rejection::session_id_required("sessionId required").into_response();
    };
    let session_id = SessionId::from_raw(raw_id.as_str());

    let supported = &state.config.protocol_version;
    if let Err(rejection) = negotiate::check_version(&headers, supported, false) {
        return rejection.into_response();
    }

    let Some(session) = state.registry.lookup_variant(&session_id, Variant::Legacy) else {
        tracing::debug!(session_id = %session_id, "Submit for unknown session");
        return Rejection::session_not_found().into_response();
    };

    if let Err(rejection) = negotiate::check_content_type(&headers) {
        return rejection.into_response();
    }

    let message = match Dispatcher::decode(&body) {
        Ok(message) => message,
        Err(rejection) => return rejection.into_response(),
    };

    session.touch();
    state
        .dispatcher
        .spawn_delivery(state.registry.clone(), session.id.clone(), message);

    (StatusCode::ACCEPTED, "Accepted").into_response()
}
