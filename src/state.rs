use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::models::driver::DriverProfile;
use crate::models::ride::RideRequest;
use crate::models::user::UserProfile;
use crate::observability::metrics::Metrics;
use crate::views::ViewRegistry;

pub struct AppState {
    pub users: DashMap<String, UserProfile>,
    pub drivers: DashMap<String, DriverProfile>,
    pub rides: DashMap<Uuid, RideRequest>,
    /// One entry per customer while they hold a pending/accepted/in-progress
    /// ride; claimed atomically at request time.
    pub active_ride_by_customer: DashMap<String, Uuid>,
    /// One entry per driver while they hold an accepted/in-progress ride.
    pub active_ride_by_driver: DashMap<String, Uuid>,
    pub views: ViewRegistry,
    pub ride_events_tx: broadcast::Sender<RideRequest>,
    /// Running location reporters, keyed by driver id. Going offline aborts
    /// the reporter through this handle.
    pub location_reporters: DashMap<String, AbortHandle>,
    pub metrics: Metrics,
    pub location_stale_secs: u64,
}

impl AppState {
    pub fn new(event_buffer_size: usize, location_stale_secs: u64) -> Self {
        let (ride_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            users: DashMap::new(),
            drivers: DashMap::new(),
            rides: DashMap::new(),
            active_ride_by_customer: DashMap::new(),
            active_ride_by_driver: DashMap::new(),
            views: ViewRegistry::new(),
            ride_events_tx,
            location_reporters: DashMap::new(),
            metrics: Metrics::new(),
            location_stale_secs,
        }
    }
}
