//! HTTP gateway: a thin `axum` surface over the engine.
//!
//! `POST /exec` runs a statement batch and returns the pre-formatted
//! reply text; `GET /health` answers 200; everything else is 501. The
//! engine is synchronous, so handlers hop onto the blocking pool.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use liminaldb_core::sql;
use liminaldb_core::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub success: bool,
    pub result: String,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/exec", post(exec))
        .route("/health", get(health))
        .fallback(unimplemented)
        .with_state(engine)
}

/// Binds and serves until the process exits.
pub async fn serve(engine: Engine, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("http gateway listening on {addr}");
    axum::serve(listener, router(engine)).await
}

async fn exec(State(engine): State<Engine>, Json(request): Json<ExecRequest>) -> impl IntoResponse {
    let outcome = tokio::task::spawn_blocking(move || sql::execute_sql(&engine, &request.sql)).await;
    match outcome {
        Ok(Ok(result)) => Json(ExecResponse { success: true, result }).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => {
            log::error!("exec task panicked: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()).into_response()
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn unimplemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use liminaldb_core::DbPath;
    use tower::util::ServiceExt;

    async fn test_router() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start(DbPath::new(dir.path().join("db"))).unwrap();
        (dir, router(engine))
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let (_dir, router) = test_router().await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_unimplemented() {
        let (_dir, router) = test_router().await;
        let response = router
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn exec_runs_a_batch() {
        let (_dir, router) = test_router().await;
        let body = serde_json::json!({
            "sql": "CREATE TABLE t (id int primary key); INSERT INTO t (id) VALUES (1); SELECT * FROM t"
        });
        let response = router
            .oneshot(
                Request::post("/exec")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["success"], true);
        assert!(reply["result"].as_str().unwrap().contains("1 row(s) in set"));
    }

    #[tokio::test]
    async fn parse_error_is_bad_request() {
        let (_dir, router) = test_router().await;
        let body = serde_json::json!({ "sql": "SELEKT" });
        let response = router
            .oneshot(
                Request::post("/exec")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
