use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::user::{Identity, UserProfile, UserRole};
use crate::profiles;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/role", post(assign_role))
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub role: UserRole,
}

/// Sign-in registration: creates the profile on first sight of an identity,
/// returns the stored profile unchanged on repeats.
async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(identity): Json<Identity>,
) -> Result<Json<UserProfile>, AppError> {
    if identity.id.trim().is_empty() {
        return Err(AppError::BadRequest("identity id cannot be empty".to_string()));
    }
    if identity.email.trim().is_empty() {
        return Err(AppError::BadRequest("email cannot be empty".to_string()));
    }

    Ok(Json(profiles::ensure_user_profile(&state, &identity)))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(profiles::get_user_profile(&state, &id)?))
}

async fn assign_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<AssignRoleRequest>,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(profiles::assign_role(&state, &id, payload.role)?))
}
