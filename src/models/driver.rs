use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// Live presence record for one driver, keyed by the same id as the
/// user profile it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: String,
    pub is_online: bool,
    pub current_location: Option<LatLng>,
    pub updated_at: DateTime<Utc>,
}
