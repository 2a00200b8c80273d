//! Unified single-endpoint binding.
//!
//! One path, three methods:
//! - GET opens (or attaches) the session's event stream.
//! - POST submits a message. Without a session header it starts a new
//!   session; with one, the reply goes inline or onto the stream depending
//!   on the session's reply mode.
//! - DELETE terminates the session.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use switchyard_core::ids::SessionId;
use switchyard_core::jsonrpc::JsonRpcMessage;

use crate::config::ReplyMode;
use crate::dispatcher::Dispatcher;
use crate::negotiate::{self, Rejection, SESSION_ID_HEADER};
use crate::registry::{Session, Variant};
use crate::server::AppState;
use crate::writer::{self, WriterError};

pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = negotiate::check_unified(&headers, &state.config.protocol_version) {
        return rejection.into_response();
    }

    let session = match negotiate::session_header(&headers) {
        None => state
            .lifecycle
            .open_session(Variant::Unified, state.config.reply_mode),
        Some(id) => match state.registry.lookup_variant(&id, Variant::Unified) {
            Some(session) => session,
            None => return Rejection::session_not_found().into_response(),
        },
    };
    session.touch();

    match session.writer().open(None, state.config.keep_alive()) {
        Ok(stream) => {
            tracing::info!(session_id = %session.id, "Unified stream attached");
            writer::stream_response(stream, Some(&session.id))
        }
        Err(WriterError::AlreadyOpen) => {
            Rejection::conflict("Only one event stream is allowed per session").into_response()
        }
        Err(_) => Rejection::session_not_found().into_response(),
    }
}

pub async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = negotiate::check_unified(&headers, &state.config.protocol_version) {
        return rejection.into_response();
    }

    let existing = match negotiate::session_header(&headers) {
        None => None,
        Some(id) => match state.registry.lookup_variant(&id, Variant::Unified) {
            Some(session) => Some(session),
            None => {
                tracing::debug!(session_id = %id, "Submit for unknown session");
                return Rejection::session_not_found().into_response();
            }
        },
    };

    if let Err(rejection) = negotiate::check_content_type(&headers) {
        return rejection.into_response();
    }
    let message = match Dispatcher::decode(&body) {
        Ok(message) => message,
        Err(rejection) => return rejection.into_response(),
    };

    match existing {
        None => initiate(&state, message).await,
        Some(session) => submit(&state, session, message).await,
    }
}

pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let supported = &state.config.protocol_version;
    if let Err(rejection) = negotiate::check_version(&headers, supported, true) {
        return rejection.into_response();
    }
    let Some(id) = negotiate::session_header(&headers) else {
        return Rejection::session_id_required("Mcp-Session-Id header required").into_response();
    };

    let owned = state.registry.lookup_variant(&id, Variant::Unified).is_some();
    if owned && state.lifecycle.terminate(&id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Rejection::session_not_found().into_response()
    }
}

/// First message without a session header: create the session and answer
/// inline, since no stream can exist yet.
async fn initiate(state: &AppState, message: JsonRpcMessage) -> Response {
    let session = state
        .lifecycle
        .open_session(Variant::Unified, state.config.reply_mode);
    let reply = state.dispatcher.dispatch(message).await;
    inline_reply(state, &session.id, reply)
}

async fn submit(state: &AppState, session: Arc<Session>, message: JsonRpcMessage) -> Response {
    session.touch();

    let via_stream = session.reply_mode == ReplyMode::Stream && session.writer().is_open();
    if !message.is_request() || via_stream {
        state
            .dispatcher
            .spawn_delivery(state.registry.clone(), session.id.clone(), message);
        return with_session_header(accepted(), &session.id);
    }

    let reply = state.dispatcher.dispatch(message).await;
    inline_reply(state, &session.id, reply)
}

/// Answer in the POST body, unless the session closed while the handler
/// ran: then the reply is dropped like any late stream reply.
fn inline_reply(state: &AppState, id: &SessionId, reply: Option<JsonRpcMessage>) -> Response {
    if state.registry.lookup(id).is_none() {
        tracing::debug!(session_id = %id, "Session closed during request, dropping reply");
        if reply.is_some() {
            state.metrics.reply_dropped();
        }
        return Rejection::session_not_found().into_response();
    }
    with_session_header(reply_response(reply), id)
}

fn reply_response(reply: Option<JsonRpcMessage>) -> Response {
    match reply {
        Some(reply) => (StatusCode::OK, Json(reply.to_value())).into_response(),
        None => accepted(),
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

fn with_session_header(mut response: Response, id: &SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
    response
}
