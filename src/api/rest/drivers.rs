use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, put};
use axum::Json;
use axum::Router;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::driver::{DriverProfile, LatLng};
use crate::profiles;
use crate::state::AppState;
use crate::views::{driver_snapshot, DriverQuery};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers/online", get(list_online_drivers))
        .route("/drivers/:id", put(ensure_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub is_online: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: LatLng,
}

#[derive(Deserialize)]
pub struct OnlineDriversQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Optional radius filter. The underlying view is unscoped (every online
    /// driver is visible everywhere); this narrows the listing only.
    pub within_km: Option<f64>,
}

async fn ensure_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DriverProfile>, AppError> {
    Ok(Json(profiles::ensure_driver_profile(&state, &id)?))
}

/// Online drivers with a live location. Drivers whose last fix is older
/// than the configured staleness tolerance are dropped from the listing.
async fn list_online_drivers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OnlineDriversQuery>,
) -> Result<Json<Vec<DriverProfile>>, AppError> {
    let center = match (params.within_km, params.lat, params.lng) {
        (Some(radius), Some(lat), Some(lng)) => {
            if radius <= 0.0 {
                return Err(AppError::BadRequest("within_km must be > 0".to_string()));
            }
            Some((
                LatLng {
                    latitude: lat,
                    longitude: lng,
                },
                radius,
            ))
        }
        (Some(_), _, _) => {
            return Err(AppError::BadRequest(
                "within_km requires lat and lng".to_string(),
            ));
        }
        _ => None,
    };

    let freshness_floor = Utc::now() - Duration::seconds(state.location_stale_secs as i64);

    let drivers = driver_snapshot(&DriverQuery::Online, &state.drivers)
        .into_iter()
        .filter(|driver| {
            let Some(location) = driver.current_location else {
                return false;
            };
            if driver.updated_at < freshness_floor {
                return false;
            }
            match &center {
                Some((point, radius)) => haversine_km(&location, point) <= *radius,
                None => true,
            }
        })
        .collect();

    Ok(Json(drivers))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    Ok(Json(profiles::set_driver_online(
        &state,
        &id,
        payload.is_online,
    )?))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    Ok(Json(profiles::update_driver_location(
        &state,
        &id,
        payload.location,
    )?))
}
