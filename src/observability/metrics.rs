use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_transitions_total: IntCounterVec,
    pub online_drivers: IntGauge,
    pub view_deliveries_total: IntCounterVec,
    pub location_fixes_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_transitions_total = IntCounterVec::new(
            Opts::new(
                "ride_transitions_total",
                "Ride status transitions by target status and outcome",
            ),
            &["status", "outcome"],
        )
        .expect("valid ride_transitions_total metric");

        let online_drivers = IntGauge::new("online_drivers", "Current number of online drivers")
            .expect("valid online_drivers metric");

        let view_deliveries_total = IntCounterVec::new(
            Opts::new(
                "view_deliveries_total",
                "Snapshots delivered to live views by collection",
            ),
            &["view"],
        )
        .expect("valid view_deliveries_total metric");

        let location_fixes_total = IntCounterVec::new(
            Opts::new(
                "location_fixes_total",
                "Driver location fixes processed by outcome",
            ),
            &["outcome"],
        )
        .expect("valid location_fixes_total metric");

        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(online_drivers.clone()))
            .expect("register online_drivers");
        registry
            .register(Box::new(view_deliveries_total.clone()))
            .expect("register view_deliveries_total");
        registry
            .register(Box::new(location_fixes_total.clone()))
            .expect("register location_fixes_total");

        Self {
            registry,
            ride_transitions_total,
            online_drivers,
            view_deliveries_total,
            location_fixes_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
