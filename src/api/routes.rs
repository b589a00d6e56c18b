//! API route definitions.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.snapshot.borrow().clone();
    let elapsed = *state.elapsed.borrow();
    Json(json!({
        "data": snapshot,
        "meta": {
            "elapsed_secs": elapsed,
            "settled": snapshot.is_settled(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::engine::{MonitorSnapshot, SyncState, Visible};
    use crate::status::{ExecutionId, Status};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn state(status: Status) -> AppState {
        let (_snap_tx, snapshot) = watch::channel(MonitorSnapshot {
            execution_id: ExecutionId::new("17"),
            status,
            visible: Visible {
                progress: 30,
                executed_conversations: 3,
                total_conversations: 10,
                ..Visible::default()
            },
            sync: SyncState {
                last_status: status,
                is_polling: true,
                poll_error_streak: 0,
                queue_disabled: false,
            },
        });
        let (_elapsed_tx, elapsed) = watch::channel(12);
        AppState { snapshot, elapsed }
    }

    async fn get_json(path: &str, status: Status) -> (StatusCode, Value) {
        let resp = router(state(status))
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = resp.status();
        let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (code, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (code, body) = get_json("/api/v1/health", Status::Running).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reports_snapshot() {
        let (code, body) = get_json("/api/v1/status", Status::Running).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["data"]["execution_id"], "17");
        assert_eq!(body["data"]["status"], "running");
        assert_eq!(body["data"]["progress"], 30);
        assert_eq!(body["meta"]["elapsed_secs"], 12);
        assert_eq!(body["meta"]["settled"], false);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (code, _) = get_json("/api/v1/nope", Status::Running).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
