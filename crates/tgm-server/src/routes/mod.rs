//! API route modules.

pub mod accounts;
pub mod health;

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::hub;
use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origin));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/tdclienthub", get(hub::ws_handler))
        .merge(accounts::router())
        .layer(layers)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
            cors
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tgm_core::protocol::BridgeClientFactory;
    use tgm_core::types::NewAccount;
    use tgm_core::{AccountStore, Database};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.td.directory = temp_dir.path().join("td");
        let db = Database::open_in_memory().unwrap();
        db.add_account(&NewAccount {
            phone_number: "15550001".into(),
            first_name: "Ann".into(),
            last_name: None,
        })
        .unwrap();
        AppState::new(config, db, Arc::new(BridgeClientFactory::new("true", vec![])))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (status, body) = get_json(create_router(test_state()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["database"], true);
        assert_eq!(body["metrics"]["account_sessions"], 0);
        assert_eq!(body["metrics"]["websocket_connections"], 0);
    }

    #[tokio::test]
    async fn test_accounts_listed_with_stopped_state() {
        let (status, body) = get_json(create_router(test_state()), "/tdclients/accounts").await;

        assert_eq!(status, StatusCode::OK);
        let accounts = body.as_array().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0]["phone_number"], "15550001");
        assert_eq!(accounts[0]["first_name"], "Ann");
        assert_eq!(accounts[0]["state"], "stopped");
    }

    #[test]
    fn test_invalid_cors_origin_is_tolerated() {
        let _layer = cors_layer("not a\nheader");
    }
}
