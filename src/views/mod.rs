use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::driver::DriverProfile;
use crate::models::ride::{RideRequest, RideStatus};

/// Standing queries over the ride store. Each subscriber receives the full
/// matching result set again on every store mutation, never deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum RideQuery {
    /// One customer's rides still in a pending/accepted/in-progress status.
    /// There is at most one; consumers take the first match.
    CustomerActive(String),
    /// Every pending ride system-wide, newest first. Deliberately unscoped:
    /// all online drivers see all open requests.
    Pending,
    /// The accepted/in-progress rides bound to one driver.
    DriverActive(String),
}

/// Standing queries over the driver store.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverQuery {
    /// All drivers currently flagged online, with no geographic narrowing.
    Online,
}

pub fn ride_snapshot(query: &RideQuery, rides: &DashMap<Uuid, RideRequest>) -> Vec<RideRequest> {
    let mut matches: Vec<RideRequest> = rides
        .iter()
        .filter_map(|entry| {
            let ride = entry.value();
            let hit = match query {
                RideQuery::CustomerActive(customer_id) => {
                    ride.customer_id == *customer_id && ride.status.is_active()
                }
                RideQuery::Pending => ride.status == RideStatus::Pending,
                RideQuery::DriverActive(driver_id) => {
                    ride.driver_id.as_deref() == Some(driver_id.as_str())
                        && ride.status.occupies_driver()
                }
            };
            hit.then(|| ride.clone())
        })
        .collect();

    if matches!(query, RideQuery::Pending) {
        matches.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
    }

    matches
}

pub fn driver_snapshot(
    query: &DriverQuery,
    drivers: &DashMap<String, DriverProfile>,
) -> Vec<DriverProfile> {
    drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            let hit = match query {
                DriverQuery::Online => driver.is_online,
            };
            hit.then(|| driver.clone())
        })
        .collect()
}

struct RideViewEntry {
    query: RideQuery,
    tx: mpsc::UnboundedSender<Vec<RideRequest>>,
}

struct DriverViewEntry {
    query: DriverQuery,
    tx: mpsc::UnboundedSender<Vec<DriverProfile>>,
}

struct RegistryInner {
    ride_views: DashMap<Uuid, RideViewEntry>,
    driver_views: DashMap<Uuid, DriverViewEntry>,
}

/// Registry of live subscriptions. Store-mutating operations call the
/// `publish_*` methods synchronously after every committed write, so each
/// view's deliveries are monotonic in write order.
pub struct ViewRegistry {
    inner: Arc<RegistryInner>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                ride_views: DashMap::new(),
                driver_views: DashMap::new(),
            }),
        }
    }

    /// Registers a ride view and delivers its initial snapshot immediately.
    pub fn subscribe_rides(
        &self,
        query: RideQuery,
        rides: &DashMap<Uuid, RideRequest>,
    ) -> ViewHandle<RideRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ride_snapshot(&query, rides));

        let id = Uuid::new_v4();
        self.inner.ride_views.insert(id, RideViewEntry { query, tx });

        ViewHandle {
            id,
            kind: ViewKind::Rides,
            inner: self.inner.clone(),
            rx,
        }
    }

    /// Registers a driver view and delivers its initial snapshot immediately.
    pub fn subscribe_drivers(
        &self,
        query: DriverQuery,
        drivers: &DashMap<String, DriverProfile>,
    ) -> ViewHandle<DriverProfile> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(driver_snapshot(&query, drivers));

        let id = Uuid::new_v4();
        self.inner.driver_views.insert(id, DriverViewEntry { query, tx });

        ViewHandle {
            id,
            kind: ViewKind::Drivers,
            inner: self.inner.clone(),
            rx,
        }
    }

    /// Re-evaluates every ride view against the current store. Returns the
    /// number of snapshots delivered.
    pub fn publish_rides(&self, rides: &DashMap<Uuid, RideRequest>) -> usize {
        let mut delivered = 0;
        for entry in self.inner.ride_views.iter() {
            let snapshot = ride_snapshot(&entry.query, rides);
            if entry.tx.send(snapshot).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Re-evaluates every driver view against the current store. Returns the
    /// number of snapshots delivered.
    pub fn publish_drivers(&self, drivers: &DashMap<String, DriverProfile>) -> usize {
        let mut delivered = 0;
        for entry in self.inner.driver_views.iter() {
            let snapshot = driver_snapshot(&entry.query, drivers);
            if entry.tx.send(snapshot).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

enum ViewKind {
    Rides,
    Drivers,
}

/// One live subscription. Cancelling (or dropping) removes the standing
/// query from the registry; nothing is delivered afterwards.
pub struct ViewHandle<T> {
    id: Uuid,
    kind: ViewKind,
    inner: Arc<RegistryInner>,
    rx: mpsc::UnboundedReceiver<Vec<T>>,
}

impl<T> ViewHandle<T> {
    pub async fn recv(&mut self) -> Option<Vec<T>> {
        self.rx.recv().await
    }

    /// Non-blocking read of the next queued snapshot, if any.
    pub fn try_recv(&mut self) -> Option<Vec<T>> {
        self.rx.try_recv().ok()
    }

    /// Deregisters the view. Idempotent and safe on an already-cancelled
    /// handle; queued snapshots stay readable but no new ones arrive.
    pub fn cancel(&self) {
        match self.kind {
            ViewKind::Rides => {
                self.inner.ride_views.remove(&self.id);
            }
            ViewKind::Drivers => {
                self.inner.driver_views.remove(&self.id);
            }
        }
    }
}

impl<T> Drop for ViewHandle<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
