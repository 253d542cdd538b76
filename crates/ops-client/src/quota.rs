//! Fair-use quota tracking from response headers
//!
//! OPS reports usage on every response:
//!
//! - `X-IndividualQuotaPerHour: used=1234,quota=450000000`
//! - `X-RegisteredQuotaPerWeek: used=5678,quota=5000000000`
//! - `X-Throttling-Control: idle (images=green:200, search=yellow:15, ...)`
//!
//! The tracker keeps only the most recent snapshot (last write wins).

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use reqwest::header::HeaderMap;
use tracing::{debug, warn};

pub const INDIVIDUAL_QUOTA_HEADER: &str = "x-individualquotaperhour";
pub const REGISTERED_QUOTA_HEADER: &str = "x-registeredquotaperweek";
pub const THROTTLING_HEADER: &str = "x-throttling-control";

/// Used/limit pair for one quota class, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    pub quota: u64,
}

impl QuotaUsage {
    /// Parse `used=<int>,quota=<int>` (order and spacing insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        let mut used = None;
        let mut quota = None;
        for part in value.split(',') {
            let (key, raw) = part.split_once('=')?;
            let number = raw.trim().parse::<u64>().ok()?;
            match key.trim().to_ascii_lowercase().as_str() {
                "used" => used = Some(number),
                "quota" => quota = Some(number),
                _ => {}
            }
        }
        Some(Self {
            used: used?,
            quota: quota?,
        })
    }

    pub fn remaining(&self) -> u64 {
        self.quota.saturating_sub(self.used)
    }

    /// Percentage used (0.0 - 100.0), `None` when the limit is zero.
    pub fn usage_pct(&self) -> Option<f64> {
        (self.quota > 0).then(|| self.used as f64 / self.quota as f64 * 100.0)
    }
}

/// Per-service traffic light colour. Ordered from healthy to blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
    Black,
}

impl TrafficLight {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "green" => Some(TrafficLight::Green),
            "yellow" => Some(TrafficLight::Yellow),
            "red" => Some(TrafficLight::Red),
            "black" => Some(TrafficLight::Black),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrafficLight::Green => "green",
            TrafficLight::Yellow => "yellow",
            TrafficLight::Red => "red",
            TrafficLight::Black => "black",
        }
    }
}

/// Throttling state of one service family (search, retrieval, images, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceThrottle {
    pub service: String,
    pub light: TrafficLight,
    pub requests_per_minute: u32,
}

/// Latest observed fair-use state.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSnapshot {
    /// Overall system state, e.g. `idle`, `busy`, `overloaded`
    pub status: Option<String>,
    pub services: Vec<ServiceThrottle>,
    pub individual: Option<QuotaUsage>,
    pub registered: Option<QuotaUsage>,
    pub observed_at: SystemTime,
}

impl QuotaSnapshot {
    /// Build a snapshot from response headers; `None` when no quota header
    /// is present at all.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let individual_raw = header(INDIVIDUAL_QUOTA_HEADER);
        let registered_raw = header(REGISTERED_QUOTA_HEADER);
        let throttling_raw = header(THROTTLING_HEADER);
        if individual_raw.is_none() && registered_raw.is_none() && throttling_raw.is_none() {
            return None;
        }

        let (status, services) = throttling_raw
            .map(parse_throttling)
            .unwrap_or((None, Vec::new()));

        Some(Self {
            status,
            services,
            individual: individual_raw.and_then(QuotaUsage::parse),
            registered: registered_raw.and_then(QuotaUsage::parse),
            observed_at: SystemTime::now(),
        })
    }

    /// Most restrictive light across all services.
    pub fn worst_light(&self) -> Option<TrafficLight> {
        self.services.iter().map(|s| s.light).max()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceThrottle> {
        self.services
            .iter()
            .find(|s| s.service.eq_ignore_ascii_case(name))
    }
}

/// Parse `idle (images=green:200, search=yellow:15)`. Malformed service
/// entries are skipped.
fn parse_throttling(value: &str) -> (Option<String>, Vec<ServiceThrottle>) {
    let (state, rest) = match value.split_once('(') {
        Some((state, rest)) => (state, rest.trim_end().trim_end_matches(')')),
        None => (value, ""),
    };
    let state = state.trim();
    let status = (!state.is_empty()).then(|| state.to_ascii_lowercase());

    let services = rest
        .split(',')
        .filter_map(|entry| {
            let (service, light) = entry.split_once('=')?;
            let (colour, rpm) = light.split_once(':')?;
            Some(ServiceThrottle {
                service: service.trim().to_string(),
                light: TrafficLight::parse(colour)?,
                requests_per_minute: rpm.trim().parse().ok()?,
            })
        })
        .collect();

    (status, services)
}

/// Thread-safe holder of the latest `QuotaSnapshot`, one per client.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    latest: Mutex<Option<QuotaSnapshot>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot.
    pub fn update(&self, snapshot: QuotaSnapshot) {
        if let Some(light) = snapshot.worst_light()
            && light >= TrafficLight::Red
        {
            warn!(
                light = light.label(),
                status = snapshot.status.as_deref().unwrap_or("unknown"),
                "upstream throttling active"
            );
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Parse and store quota headers; returns whether any were present.
    pub fn update_from_headers(&self, headers: &HeaderMap) -> bool {
        match QuotaSnapshot::from_headers(headers) {
            Some(snapshot) => {
                debug!(
                    individual_used = snapshot.individual.map(|u| u.used),
                    registered_used = snapshot.registered.map(|u| u.used),
                    "quota headers observed"
                );
                self.update(snapshot);
                true
            }
            None => false,
        }
    }

    /// Latest snapshot, or `None` before the first response with quota headers.
    pub fn get(&self) -> Option<QuotaSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
