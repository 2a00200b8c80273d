//! Per-request header checks shared by both adapters.
//!
//! Every check is a pure function of the request headers. A failed check
//! yields a [`Rejection`]: an HTTP status plus a JSON-RPC error envelope with
//! a null id.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use switchyard_core::ids::SessionId;
use switchyard_core::jsonrpc::{JsonRpcError, JsonRpcMessage};

pub const SESSION_ID_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

const JSON_MEDIA_TYPE: &str = "application/json";
const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

/// A request refused before it reached the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub status: StatusCode,
    pub error: JsonRpcError,
}

impl Rejection {
    pub fn new(status: StatusCode, error: JsonRpcError) -> Self {
        Self { status, error }
    }

    pub fn session_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, JsonRpcError::session_not_found())
    }

    pub fn session_id_required(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, JsonRpcError::invalid_request(message))
    }

    /// Body failed to decode as a JSON-RPC message.
    pub fn bad_message(error: JsonRpcError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            JsonRpcError::server_error(format!("Conflict: {message}")),
        )
    }

    pub fn internal(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonRpcError::internal_error().with_data(serde_json::json!(message)),
        )
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        tracing::debug!(
            status = self.status.as_u16(),
            code = self.error.code,
            message = %self.error.message,
            "Request rejected"
        );
        let body = JsonRpcMessage::failure(None, self.error).to_value();
        (self.status, Json(body)).into_response()
    }
}

/// Media types listed in a header, lowercased, parameters stripped.
fn media_types(headers: &HeaderMap, name: header::HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|part| {
            part.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|m| !m.is_empty())
        .collect()
}

/// The client must accept both structured JSON and event streams.
pub fn check_accept(headers: &HeaderMap) -> Result<(), Rejection> {
    let accepted = media_types(headers, header::ACCEPT);
    let json = accepted.iter().any(|m| m == JSON_MEDIA_TYPE);
    let stream = accepted.iter().any(|m| m == EVENT_STREAM_MEDIA_TYPE);
    if json && stream {
        Ok(())
    } else {
        Err(Rejection::new(
            StatusCode::NOT_ACCEPTABLE,
            JsonRpcError::server_error(
                "Not Acceptable: Client must accept both application/json and text/event-stream",
            ),
        ))
    }
}

/// The protocol-version header must match `supported` exactly. When not
/// `required`, an absent header passes but a present one is still checked.
pub fn check_version(
    headers: &HeaderMap,
    supported: &str,
    required: bool,
) -> Result<(), Rejection> {
    let mismatch = |detail: String| -> Result<(), Rejection> {
        Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            JsonRpcError::server_error(format!("Protocol version mismatch: {detail}")),
        ))
    };

    match headers.get(PROTOCOL_VERSION_HEADER) {
        None if required => mismatch(format!(
            "missing {PROTOCOL_VERSION_HEADER} header, expected {supported}"
        )),
        None => Ok(()),
        Some(value) => match value.to_str() {
            Ok(v) if v.trim() == supported => Ok(()),
            Ok(v) => mismatch(format!("got {v}, expected {supported}")),
            Err(_) => mismatch(format!("unreadable header, expected {supported}")),
        },
    }
}

/// Submitted bodies must be declared as JSON.
pub fn check_content_type(headers: &HeaderMap) -> Result<(), Rejection> {
    let declared = media_types(headers, header::CONTENT_TYPE);
    if declared.first().map(String::as_str) == Some(JSON_MEDIA_TYPE) {
        Ok(())
    } else {
        Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            JsonRpcError::invalid_request("Unsupported content type: expected application/json"),
        ))
    }
}

/// Full pre-check for unified GET and POST: accept first, then version.
pub fn check_unified(headers: &HeaderMap, supported: &str) -> Result<(), Rejection> {
    check_accept(headers)?;
    check_version(headers, supported, true)
}

/// Session id from the session header, if present and non-empty.
pub fn session_header(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SessionId::from_raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use switchyard_core::jsonrpc::{INVALID_REQUEST, SERVER_ERROR, SESSION_NOT_FOUND};

    const V: &str = "2025-03-26";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn accept_needs_both_types() {
        let both = headers(&[("accept", "application/json, text/event-stream")]);
        assert!(check_accept(&both).is_ok());

        let err = check_accept(&headers(&[("accept", "application/json")])).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(err.error.code, SERVER_ERROR);
        assert!(err.error.message.starts_with("Not Acceptable"));

        assert!(check_accept(&HeaderMap::new()).is_err());
    }

    #[test]
    fn accept_tolerates_params_case_and_repeats() {
        let h = headers(&[
            ("accept", "Application/JSON;q=0.9"),
            ("accept", "text/event-stream; charset=utf-8"),
        ]);
        assert!(check_accept(&h).is_ok());
    }

    #[test]
    fn version_exact_match() {
        assert!(check_version(&headers(&[("mcp-protocol-version", V)]), V, true).is_ok());

        let err = check_version(&headers(&[("mcp-protocol-version", "1999-01-01")]), V, true)
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error.code, SERVER_ERROR);
        assert!(err.error.message.starts_with("Protocol version mismatch"));
    }

    #[test]
    fn version_optional_when_not_required() {
        assert!(check_version(&HeaderMap::new(), V, false).is_ok());
        assert!(check_version(&HeaderMap::new(), V, true).is_err());
        assert!(check_version(&headers(&[("mcp-protocol-version", "nope")]), V, false).is_err());
    }

    #[test]
    fn unified_checks_accept_before_version() {
        let err = check_unified(&HeaderMap::new(), V).unwrap_err();
        assert!(err.error.message.starts_with("Not Acceptable"));

        let err = check_unified(&headers(&[("accept", "application/json, text/event-stream")]), V)
            .unwrap_err();
        assert!(err.error.message.starts_with("Protocol version mismatch"));
    }

    #[test]
    fn content_type_must_be_json() {
        assert!(check_content_type(&headers(&[("content-type", "application/json")])).is_ok());
        assert!(
            check_content_type(&headers(&[("content-type", "application/json; charset=utf-8")]))
                .is_ok()
        );
        let err = check_content_type(&headers(&[("content-type", "text/plain")])).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error.code, INVALID_REQUEST);
        assert!(check_content_type(&HeaderMap::new()).is_err());
    }

    #[test]
    fn session_header_parsing() {
        assert_eq!(
            session_header(&headers(&[("mcp-session-id", "sess_abc")])),
            Some(SessionId::from_raw("sess_abc"))
        );
        assert_eq!(session_header(&headers(&[("mcp-session-id", "  ")])), None);
        assert_eq!(session_header(&HeaderMap::new()), None);
    }

    #[test]
    fn rejection_renders_null_id_envelope() {
        let rejection = Rejection::session_not_found();
        assert_eq!(rejection.status, StatusCode::NOT_FOUND);
        assert_eq!(rejection.error.code, SESSION_NOT_FOUND);
        let response = rejection.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
