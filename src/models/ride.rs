use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::LatLng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// A ride in one of these states blocks its customer from requesting
    /// another one.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RideStatus::Pending | RideStatus::Accepted | RideStatus::InProgress
        )
    }

    /// States that keep the accepting driver occupied.
    pub fn occupies_driver(self) -> bool {
        matches!(self, RideStatus::Accepted | RideStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Rejected | RideStatus::Completed | RideStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Rejected => "rejected",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_location: LatLng,
    pub pickup_address: String,
    pub destination_location: LatLng,
    pub destination_address: String,
    pub driver_id: Option<String>,
    pub driver_name: Option<String>,
    pub status: RideStatus,
    pub fare: Option<f64>,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
