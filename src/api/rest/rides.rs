use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle;
use crate::models::driver::LatLng;
use crate::models::ride::{RideRequest, RideStatus};
use crate::state::AppState;
use crate::views::{ride_snapshot, RideQuery};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/pending", get(list_pending_rides))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/reject", post(reject_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/status", post(update_ride_status))
        .route("/customers/:id/active-ride", get(customer_active_ride))
        .route("/drivers/:id/active-ride", get(driver_active_ride))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub customer_id: String,
    pub customer_name: String,
    pub customer_location: LatLng,
    pub pickup_address: String,
    pub destination_location: LatLng,
    pub destination_address: String,
}

#[derive(Deserialize)]
pub struct AcceptRideRequest {
    pub driver_id: String,
    pub driver_name: String,
}

#[derive(Deserialize)]
pub struct UpdateRideStatusRequest {
    pub status: RideStatus,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<RideRequest>, AppError> {
    if payload.customer_id.trim().is_empty() {
        return Err(AppError::BadRequest("customer_id cannot be empty".to_string()));
    }
    if payload.pickup_address.trim().is_empty() || payload.destination_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "pickup and destination addresses cannot be empty".to_string(),
        ));
    }

    let ride = lifecycle::request_ride(
        &state,
        &payload.customer_id,
        &payload.customer_name,
        payload.customer_location,
        &payload.pickup_address,
        payload.destination_location,
        &payload.destination_address,
    )?;

    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::get_ride(&state, id)?))
}

/// Every open request system-wide, newest first. What an online driver polls
/// between snapshot deliveries.
async fn list_pending_rides(State(state): State<Arc<AppState>>) -> Json<Vec<RideRequest>> {
    Json(ride_snapshot(&RideQuery::Pending, &state.rides))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRideRequest>,
) -> Result<Json<RideRequest>, AppError> {
    if payload.driver_id.trim().is_empty() {
        return Err(AppError::BadRequest("driver_id cannot be empty".to_string()));
    }

    Ok(Json(lifecycle::accept_ride(
        &state,
        id,
        &payload.driver_id,
        &payload.driver_name,
    )?))
}

async fn reject_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::reject_ride(&state, id)?))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::cancel_ride(&state, id)?))
}

async fn update_ride_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRideStatusRequest>,
) -> Result<Json<RideRequest>, AppError> {
    Ok(Json(lifecycle::update_ride_status(&state, id, payload.status)?))
}

/// The customer's single pending/accepted/in-progress ride, if any.
async fn customer_active_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Option<RideRequest>> {
    let mut matches = ride_snapshot(&RideQuery::CustomerActive(id), &state.rides);
    Json(if matches.is_empty() {
        None
    } else {
        Some(matches.remove(0))
    })
}

/// The ride currently occupying a driver, if any.
async fn driver_active_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Option<RideRequest>> {
    let mut matches = ride_snapshot(&RideQuery::DriverActive(id), &state.rides);
    Json(if matches.is_empty() {
        None
    } else {
        Some(matches.remove(0))
    })
}
