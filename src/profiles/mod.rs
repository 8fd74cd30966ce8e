use chrono::Utc;
use tracing::info;

use crate::error::AppError;
use crate::models::driver::{DriverProfile, LatLng};
use crate::models::user::{Identity, UserProfile, UserRole};
use crate::state::AppState;

/// Create-if-absent from a signed-in identity. Repeat sign-ins return the
/// stored profile unchanged.
pub fn ensure_user_profile(state: &AppState, identity: &Identity) -> UserProfile {
    let now = Utc::now();
    state
        .users
        .entry(identity.id.clone())
        .or_insert_with(|| {
            info!(user_id = %identity.id, "user profile created");
            UserProfile {
                id: identity.id.clone(),
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
                photo_url: identity.photo_url.clone(),
                role: None,
                created_at: now,
                updated_at: now,
            }
        })
        .clone()
}

pub fn get_user_profile(state: &AppState, user_id: &str) -> Result<UserProfile, AppError> {
    state
        .users
        .get(user_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))
}

/// Sets the role exactly once. Re-assigning the same role is a no-op;
/// switching roles after assignment is refused, never overwritten.
pub fn assign_role(
    state: &AppState,
    user_id: &str,
    role: UserRole,
) -> Result<UserProfile, AppError> {
    let mut entry = state
        .users
        .get_mut(user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))?;
    let profile = entry.value_mut();

    match profile.role {
        Some(existing) if existing == role => Ok(profile.clone()),
        Some(_) => Err(AppError::Conflict(format!(
            "user {user_id} already has a role"
        ))),
        None => {
            profile.role = Some(role);
            profile.updated_at = Utc::now();
            info!(user_id, ?role, "role assigned");
            Ok(profile.clone())
        }
    }
}

/// Lazily creates the driver's presence record the first time a driver-role
/// user touches the driver surface. Starts offline with no location.
pub fn ensure_driver_profile(state: &AppState, user_id: &str) -> Result<DriverProfile, AppError> {
    let user = get_user_profile(state, user_id)?;
    if user.role != Some(UserRole::Driver) {
        return Err(AppError::Forbidden(format!("user {user_id} is not a driver")));
    }

    let profile = state
        .drivers
        .entry(user_id.to_string())
        .or_insert_with(|| {
            info!(user_id, "driver profile created");
            DriverProfile {
                id: user_id.to_string(),
                is_online: false,
                current_location: None,
                updated_at: Utc::now(),
            }
        })
        .clone();

    Ok(profile)
}

/// Flips the online flag. Going offline also aborts any running location
/// reporter so no fix can land after the toggle.
pub fn set_driver_online(
    state: &AppState,
    driver_id: &str,
    online: bool,
) -> Result<DriverProfile, AppError> {
    let mut entry = state
        .drivers
        .get_mut(driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
    let driver = entry.value_mut();

    driver.is_online = online;
    driver.updated_at = Utc::now();
    let confirmed = driver.clone();
    drop(entry);

    if !online {
        if let Some((_, reporter)) = state.location_reporters.remove(driver_id) {
            reporter.abort();
        }
    }

    refresh_online_gauge(state);
    publish_driver_change(state);

    info!(driver_id, online, "driver online status updated");
    Ok(confirmed)
}

pub fn update_driver_location(
    state: &AppState,
    driver_id: &str,
    location: LatLng,
) -> Result<DriverProfile, AppError> {
    let mut entry = state
        .drivers
        .get_mut(driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
    let driver = entry.value_mut();

    driver.current_location = Some(location);
    driver.updated_at = Utc::now();
    let confirmed = driver.clone();
    drop(entry);

    publish_driver_change(state);
    Ok(confirmed)
}

fn refresh_online_gauge(state: &AppState) {
    let online = state
        .drivers
        .iter()
        .filter(|entry| entry.value().is_online)
        .count();
    state.metrics.online_drivers.set(online as i64);
}

fn publish_driver_change(state: &AppState) {
    let delivered = state.views.publish_drivers(&state.drivers);
    state
        .metrics
        .view_deliveries_total
        .with_label_values(&["drivers"])
        .inc_by(delivered as u64);
}
