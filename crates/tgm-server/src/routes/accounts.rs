//! Account listing routes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;
use tgm_core::types::AccountView;

use crate::state::AppState;

/// Create account router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tdclients/accounts", get(list_accounts))
}

/// List paired accounts with their live state
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AccountView>>, (StatusCode, String)> {
    let accounts = state
        .registry
        .account_views()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(accounts))
}
