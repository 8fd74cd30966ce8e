use std::sync::Arc;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::models::driver::LatLng;
use crate::profiles;
use crate::state::AppState;

/// Failure modes of the device geolocation collaborator.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location access denied")]
    PermissionDenied,

    #[error("location information is unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,
}

/// Feeds one online driver's profile from a stream of device fixes.
///
/// The first failed fix forces the driver offline and ends the loop: a
/// driver without a working location feed must not keep showing up as
/// online. The loop also ends when the driver goes offline by other means
/// or the fix stream closes.
pub async fn run_location_reporter<S>(state: Arc<AppState>, driver_id: String, mut fixes: S)
where
    S: Stream<Item = Result<LatLng, LocationError>> + Unpin,
{
    info!(driver_id = %driver_id, "location reporter started");

    while let Some(fix) = fixes.next().await {
        match fix {
            Ok(location) => {
                let still_online = state
                    .drivers
                    .get(&driver_id)
                    .map(|entry| entry.value().is_online)
                    .unwrap_or(false);
                if !still_online {
                    break;
                }

                if let Err(err) = profiles::update_driver_location(&state, &driver_id, location) {
                    warn!(driver_id = %driver_id, error = %err, "dropping location fix");
                    break;
                }
                state
                    .metrics
                    .location_fixes_total
                    .with_label_values(&["ok"])
                    .inc();
            }
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "location watch failed, forcing driver offline");
                state
                    .metrics
                    .location_fixes_total
                    .with_label_values(&["error"])
                    .inc();
                if let Err(err) = profiles::set_driver_online(&state, &driver_id, false) {
                    warn!(driver_id = %driver_id, error = %err, "could not force driver offline");
                }
                break;
            }
        }
    }

    info!(driver_id = %driver_id, "location reporter stopped");
}

/// Spawns a reporter and registers its abort handle so that going offline
/// stops it immediately. A reporter already running for the driver is
/// replaced.
pub fn spawn_location_reporter<S>(
    state: Arc<AppState>,
    driver_id: String,
    fixes: S,
) -> AbortHandle
where
    S: Stream<Item = Result<LatLng, LocationError>> + Send + Unpin + 'static,
{
    let task = tokio::spawn(run_location_reporter(
        state.clone(),
        driver_id.clone(),
        fixes,
    ));
    let handle = task.abort_handle();

    if let Some(previous) = state.location_reporters.insert(driver_id, handle.clone()) {
        previous.abort();
    }

    handle
}
