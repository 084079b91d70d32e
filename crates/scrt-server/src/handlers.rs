use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    store::{SecretView, StoreError},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default, alias = "Text")]
    pub text: String,
    #[serde(default, alias = "Expiration")]
    pub expiration: Option<DateTime<Utc>>,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    let CreateRequest { text, expiration } = body;
    let expiration = match expiration {
        Some(at) if !text.is_empty() && at > Utc::now() => at,
        _ => return bad_request("text and expiration date must be set"),
    };

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.create(&text, expiration)).await;

    match flatten(result) {
        Ok(id) => {
            info!(expiration = %expiration, "secret.create");
            (StatusCode::CREATED, id.to_string()).into_response()
        }
        Err(e) if e.is_validation() => bad_request(&e.to_string()),
        Err(e) => internal_error(e.into()),
    }
}

// ── Fetch ─────────────────────────────────────────────────────────────────────

/// JSON shape of a fetched secret. Exactly one of `text` / `expiration` is set.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FetchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl From<SecretView> for FetchResponse {
    fn from(view: SecretView) -> Self {
        match view {
            SecretView::Sealed { reveal_at } => Self {
                text: None,
                expired: false,
                expiration: Some(reveal_at),
            },
            SecretView::Revealed { text } => Self {
                text: Some(text),
                expired: true,
                expiration: None,
            },
        }
    }
}

pub async fn get_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.fetch(&id)).await;

    match flatten(result) {
        Ok(Some(view)) => Json(FetchResponse::from(view)).into_response(),
        Ok(None) => not_found(),
        // A malformed id would not have matched a route.
        Err(StoreError::InvalidIdentifier(reason)) => {
            debug!(%reason, "rejected secret id");
            not_found()
        }
        Err(e) => internal_error(e.into()),
    }
}

// ── Remove ────────────────────────────────────────────────────────────────────

pub async fn delete_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.remove(&id)).await;

    match flatten(result) {
        Ok(true) => {
            info!("secret.delete");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) | Err(StoreError::InvalidIdentifier(_)) => not_found(),
        Err(e) => internal_error(e.into()),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Fold a panicked blocking task into a storage error.
fn flatten<T>(
    result: Result<Result<T, StoreError>, tokio::task::JoinError>,
) -> Result<T, StoreError> {
    result.unwrap_or_else(|e| Err(StoreError::Storage(std::io::Error::other(e))))
}

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn sealed_view_hides_text() {
        let reveal_at = Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap();
        let body = serde_json::to_value(FetchResponse::from(SecretView::Sealed { reveal_at }))
            .unwrap();
        assert_eq!(
            body,
            json!({"Expired": false, "Expiration": "2040-01-01T00:00:00Z"})
        );
    }

    #[test]
    fn revealed_view_hides_expiration() {
        let body = serde_json::to_value(FetchResponse::from(SecretView::Revealed {
            text: "hello".into(),
        }))
        .unwrap();
        assert_eq!(body, json!({"Expired": true, "Text": "hello"}));
    }

    #[test]
    fn create_request_accepts_both_casings() {
        let lower: CreateRequest =
            serde_json::from_str(r#"{"text":"a","expiration":"2040-01-01T00:00:00Z"}"#).unwrap();
        let upper: CreateRequest =
            serde_json::from_str(r#"{"Text":"a","Expiration":"2040-01-01T00:00:00+02:00"}"#)
                .unwrap();
        assert_eq!(lower.text, upper.text);
        assert_eq!(
            upper.expiration,
            Some(Utc.with_ymd_and_hms(2039, 12, 31, 22, 0, 0).unwrap())
        );
    }

    #[test]
    fn create_request_fields_default_when_missing() {
        let empty: CreateRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.text.is_empty());
        assert!(empty.expiration.is_none());
    }
}
