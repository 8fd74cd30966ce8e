use chrono::Utc;
use dashmap::mapref::entry::Entry;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::LatLng;
use crate::models::ride::{RideRequest, RideStatus};
use crate::state::AppState;

/// Creates a new pending ride. The customer's single active-ride slot is
/// claimed through the index entry before the record exists, so a racing
/// second request loses atomically instead of slipping past a UI check.
pub fn request_ride(
    state: &AppState,
    customer_id: &str,
    customer_name: &str,
    customer_location: LatLng,
    pickup_address: &str,
    destination_location: LatLng,
    destination_address: &str,
) -> Result<RideRequest, AppError> {
    let ride_id = Uuid::new_v4();

    match state.active_ride_by_customer.entry(customer_id.to_string()) {
        Entry::Occupied(_) => {
            record_transition(state, RideStatus::Pending, "conflict");
            return Err(AppError::ActiveRideExists);
        }
        Entry::Vacant(slot) => {
            slot.insert(ride_id);
        }
    }

    let now = Utc::now();
    let ride = RideRequest {
        id: ride_id,
        customer_id: customer_id.to_string(),
        customer_name: customer_name.to_string(),
        customer_location,
        pickup_address: pickup_address.to_string(),
        destination_location,
        destination_address: destination_address.to_string(),
        driver_id: None,
        driver_name: None,
        status: RideStatus::Pending,
        fare: None,
        requested_at: now,
        accepted_at: None,
        started_at: None,
        completed_at: None,
        updated_at: now,
    };

    state.rides.insert(ride_id, ride.clone());
    record_transition(state, RideStatus::Pending, "success");
    publish_ride_change(state, &ride);

    info!(ride_id = %ride_id, customer_id, "ride requested");
    Ok(ride)
}

/// `pending -> accepted` under the ride's entry guard: the status check and
/// the write happen while the guard is held, so two racing accepts yield
/// exactly one success and one conflict.
pub fn accept_ride(
    state: &AppState,
    ride_id: Uuid,
    driver_id: &str,
    driver_name: &str,
) -> Result<RideRequest, AppError> {
    let mut entry = ride_entry(state, ride_id)?;
    let ride = entry.value_mut();

    if ride.status != RideStatus::Pending {
        record_transition(state, RideStatus::Accepted, "conflict");
        return Err(AppError::InvalidTransition {
            from: ride.status,
            to: RideStatus::Accepted,
        });
    }

    // A driver carries at most one accepted/in-progress ride.
    match state.active_ride_by_driver.entry(driver_id.to_string()) {
        Entry::Occupied(_) => {
            record_transition(state, RideStatus::Accepted, "conflict");
            return Err(AppError::Conflict(format!(
                "driver {driver_id} already has an active ride"
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(ride_id);
        }
    }

    let now = Utc::now();
    ride.status = RideStatus::Accepted;
    ride.driver_id = Some(driver_id.to_string());
    ride.driver_name = Some(driver_name.to_string());
    ride.accepted_at = Some(now);
    ride.updated_at = now;

    let confirmed = ride.clone();
    drop(entry);

    record_transition(state, RideStatus::Accepted, "success");
    publish_ride_change(state, &confirmed);

    info!(ride_id = %ride_id, driver_id, "ride accepted");
    Ok(confirmed)
}

/// `pending -> rejected`. Terminal: rejected rides are not re-offered to
/// other drivers. The customer's slot is released so they can request again.
pub fn reject_ride(state: &AppState, ride_id: Uuid) -> Result<RideRequest, AppError> {
    let mut entry = ride_entry(state, ride_id)?;
    let ride = entry.value_mut();

    if ride.status != RideStatus::Pending {
        record_transition(state, RideStatus::Rejected, "conflict");
        return Err(AppError::InvalidTransition {
            from: ride.status,
            to: RideStatus::Rejected,
        });
    }

    ride.status = RideStatus::Rejected;
    ride.driver_id = None;
    ride.driver_name = None;
    ride.updated_at = Utc::now();

    let confirmed = ride.clone();
    drop(entry);

    release_claims(state, &confirmed);
    record_transition(state, RideStatus::Rejected, "success");
    publish_ride_change(state, &confirmed);

    info!(ride_id = %ride_id, "ride rejected");
    Ok(confirmed)
}

/// `{pending, accepted} -> cancelled`, triggered by the customer. An
/// in-progress ride can no longer be cancelled.
pub fn cancel_ride(state: &AppState, ride_id: Uuid) -> Result<RideRequest, AppError> {
    let mut entry = ride_entry(state, ride_id)?;
    let ride = entry.value_mut();

    if !matches!(ride.status, RideStatus::Pending | RideStatus::Accepted) {
        record_transition(state, RideStatus::Cancelled, "conflict");
        return Err(AppError::InvalidTransition {
            from: ride.status,
            to: RideStatus::Cancelled,
        });
    }

    ride.status = RideStatus::Cancelled;
    ride.updated_at = Utc::now();

    let confirmed = ride.clone();
    drop(entry);

    release_claims(state, &confirmed);
    record_transition(state, RideStatus::Cancelled, "success");
    publish_ride_change(state, &confirmed);

    info!(ride_id = %ride_id, "ride cancelled");
    Ok(confirmed)
}

/// Progress transitions driven by the assigned driver: `accepted ->
/// in_progress` and `in_progress -> completed`. Every other target status
/// has its own operation and is refused here.
pub fn update_ride_status(
    state: &AppState,
    ride_id: Uuid,
    status: RideStatus,
) -> Result<RideRequest, AppError> {
    let expected = match status {
        RideStatus::InProgress => RideStatus::Accepted,
        RideStatus::Completed => RideStatus::InProgress,
        other => {
            return Err(AppError::BadRequest(format!(
                "status {other} cannot be set directly"
            )));
        }
    };

    let mut entry = ride_entry(state, ride_id)?;
    let ride = entry.value_mut();

    if ride.status != expected {
        record_transition(state, status, "conflict");
        return Err(AppError::InvalidTransition {
            from: ride.status,
            to: status,
        });
    }

    let now = Utc::now();
    ride.status = status;
    ride.updated_at = now;
    match status {
        RideStatus::InProgress => ride.started_at = Some(now),
        RideStatus::Completed => ride.completed_at = Some(now),
        _ => {}
    }

    let confirmed = ride.clone();
    drop(entry);

    if confirmed.status.is_terminal() {
        release_claims(state, &confirmed);
    }
    record_transition(state, status, "success");
    publish_ride_change(state, &confirmed);

    info!(ride_id = %ride_id, status = %status, "ride status updated");
    Ok(confirmed)
}

pub fn get_ride(state: &AppState, ride_id: Uuid) -> Result<RideRequest, AppError> {
    state
        .rides
        .get(&ride_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))
}

fn ride_entry(
    state: &AppState,
    ride_id: Uuid,
) -> Result<dashmap::mapref::one::RefMut<'_, Uuid, RideRequest>, AppError> {
    state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))
}

/// Drops the active-ride index entries a terminal ride was holding. Guarded
/// by ride id so a newer claim by the same customer or driver is untouched.
fn release_claims(state: &AppState, ride: &RideRequest) {
    state
        .active_ride_by_customer
        .remove_if(&ride.customer_id, |_, held| *held == ride.id);

    if let Some(driver_id) = &ride.driver_id {
        state
            .active_ride_by_driver
            .remove_if(driver_id, |_, held| *held == ride.id);
    }
}

fn publish_ride_change(state: &AppState, ride: &RideRequest) {
    let delivered = state.views.publish_rides(&state.rides);
    state
        .metrics
        .view_deliveries_total
        .with_label_values(&["rides"])
        .inc_by(delivered as u64);

    let _ = state.ride_events_tx.send(ride.clone());
}

fn record_transition(state: &AppState, to: RideStatus, outcome: &str) {
    state
        .metrics
        .ride_transitions_total
        .with_label_values(&[&to.to_string(), outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::ride::RideStatus;
    use crate::state::AppState;
    use crate::views::RideQuery;

    fn state() -> AppState {
        AppState::new(64, 10)
    }

    fn pickup() -> LatLng {
        LatLng {
            latitude: 12.9,
            longitude: 77.6,
        }
    }

    fn dropoff() -> LatLng {
        LatLng {
            latitude: 12.91,
            longitude: 77.61,
        }
    }

    fn request(state: &AppState, customer_id: &str) -> RideRequest {
        request_ride(
            state,
            customer_id,
            "Asha",
            pickup(),
            "MG Road",
            dropoff(),
            "Indiranagar",
        )
        .expect("ride created")
    }

    #[test]
    fn request_creates_pending_ride() {
        let state = state();
        let ride = request(&state, "cust-1");

        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.driver_id.is_none());
        assert!(ride.fare.is_none());
        assert_eq!(get_ride(&state, ride.id).unwrap().customer_name, "Asha");
    }

    #[test]
    fn second_request_while_active_is_rejected() {
        let state = state();
        let first = request(&state, "cust-1");

        let second = request_ride(
            &state,
            "cust-1",
            "Asha",
            pickup(),
            "MG Road",
            dropoff(),
            "Indiranagar",
        );
        assert!(matches!(second, Err(AppError::ActiveRideExists)));

        // another customer is unaffected
        request(&state, "cust-2");

        // and the first ride is still the stored one
        assert_eq!(get_ride(&state, first.id).unwrap().status, RideStatus::Pending);
    }

    #[test]
    fn accept_binds_driver_and_stamps() {
        let state = state();
        let ride = request(&state, "cust-1");

        let accepted = accept_ride(&state, ride.id, "drv-1", "Ravi").unwrap();
        assert_eq!(accepted.status, RideStatus::Accepted);
        assert_eq!(accepted.driver_id.as_deref(), Some("drv-1"));
        assert_eq!(accepted.driver_name.as_deref(), Some("Ravi"));
        assert!(accepted.accepted_at.is_some());
        assert!(accepted.accepted_at.unwrap() >= accepted.requested_at);
    }

    #[test]
    fn racing_accepts_yield_one_success_one_conflict() {
        let state = state();
        let ride = request(&state, "cust-1");

        let results: Vec<Result<RideRequest, AppError>> = std::thread::scope(|scope| {
            let handles = [
                scope.spawn(|| accept_ride(&state, ride.id, "drv-1", "Ravi")),
                scope.spawn(|| accept_ride(&state, ride.id, "drv-2", "Sunil")),
            ];
            handles.map(|h| h.join().unwrap()).into_iter().collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::InvalidTransition { .. }))));

        let stored = get_ride(&state, ride.id).unwrap();
        assert_eq!(stored.status, RideStatus::Accepted);
        let winner = stored.driver_id.unwrap();
        assert!(winner == "drv-1" || winner == "drv-2");
    }

    #[test]
    fn driver_with_active_ride_cannot_accept_another() {
        let state = state();
        let first = request(&state, "cust-1");
        accept_ride(&state, first.id, "drv-1", "Ravi").unwrap();

        let second = request(&state, "cust-2");
        let result = accept_ride(&state, second.id, "drv-1", "Ravi");
        assert!(matches!(result, Err(AppError::Conflict(_))));

        // the second ride is still up for grabs
        accept_ride(&state, second.id, "drv-2", "Sunil").unwrap();
    }

    #[test]
    fn reject_is_terminal_and_frees_the_customer() {
        let state = state();
        let ride = request(&state, "cust-1");

        let rejected = reject_ride(&state, ride.id).unwrap();
        assert_eq!(rejected.status, RideStatus::Rejected);
        assert!(rejected.driver_id.is_none());

        // no edge out of rejected
        assert!(accept_ride(&state, ride.id, "drv-1", "Ravi").is_err());
        assert!(cancel_ride(&state, ride.id).is_err());

        // the customer may request again
        request(&state, "cust-1");
    }

    #[test]
    fn cancel_allowed_from_pending_and_accepted_only() {
        let state = state();

        let pending = request(&state, "cust-1");
        assert_eq!(
            cancel_ride(&state, pending.id).unwrap().status,
            RideStatus::Cancelled
        );

        let accepted = request(&state, "cust-1");
        accept_ride(&state, accepted.id, "drv-1", "Ravi").unwrap();
        assert_eq!(
            cancel_ride(&state, accepted.id).unwrap().status,
            RideStatus::Cancelled
        );

        let in_progress = request(&state, "cust-1");
        accept_ride(&state, in_progress.id, "drv-2", "Sunil").unwrap();
        update_ride_status(&state, in_progress.id, RideStatus::InProgress).unwrap();
        let result = cancel_ride(&state, in_progress.id);
        assert!(matches!(
            result,
            Err(AppError::InvalidTransition {
                from: RideStatus::InProgress,
                to: RideStatus::Cancelled,
            })
        ));
    }

    #[test]
    fn cancel_of_accepted_ride_frees_the_driver() {
        let state = state();
        let ride = request(&state, "cust-1");
        accept_ride(&state, ride.id, "drv-1", "Ravi").unwrap();
        cancel_ride(&state, ride.id).unwrap();

        let next = request(&state, "cust-2");
        accept_ride(&state, next.id, "drv-1", "Ravi").unwrap();
    }

    #[test]
    fn progress_transitions_stamp_and_complete() {
        let state = state();
        let ride = request(&state, "cust-1");
        accept_ride(&state, ride.id, "drv-1", "Ravi").unwrap();

        let started = update_ride_status(&state, ride.id, RideStatus::InProgress).unwrap();
        assert_eq!(started.status, RideStatus::InProgress);
        assert!(started.started_at.is_some());

        let completed = update_ride_status(&state, ride.id, RideStatus::Completed).unwrap();
        assert_eq!(completed.status, RideStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert!(completed.completed_at.unwrap() >= started.started_at.unwrap());

        // completion frees both parties
        let next = request(&state, "cust-1");
        accept_ride(&state, next.id, "drv-1", "Ravi").unwrap();
    }

    #[test]
    fn progress_transitions_validate_predecessor() {
        let state = state();
        let ride = request(&state, "cust-1");

        // pending ride cannot jump straight to in_progress or completed
        assert!(update_ride_status(&state, ride.id, RideStatus::InProgress).is_err());
        assert!(update_ride_status(&state, ride.id, RideStatus::Completed).is_err());
    }

    #[test]
    fn direct_writes_of_guarded_statuses_are_refused() {
        let state = state();
        let ride = request(&state, "cust-1");

        for status in [
            RideStatus::Pending,
            RideStatus::Accepted,
            RideStatus::Rejected,
            RideStatus::Cancelled,
        ] {
            let result = update_ride_status(&state, ride.id, status);
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn unknown_ride_is_not_found() {
        let state = state();
        let missing = Uuid::new_v4();
        assert!(matches!(
            accept_ride(&state, missing, "drv-1", "Ravi"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn transitions_reach_subscribed_views() {
        let state = state();
        let mut pending_view = state
            .views
            .subscribe_rides(RideQuery::Pending, &state.rides);
        assert!(pending_view.try_recv().expect("initial").is_empty());

        let ride = request(&state, "cust-1");
        let after_request = pending_view.try_recv().expect("after request");
        assert_eq!(after_request.len(), 1);

        accept_ride(&state, ride.id, "drv-1", "Ravi").unwrap();
        let after_accept = pending_view.try_recv().expect("after accept");
        assert!(after_accept.is_empty());
    }
}
