//! Positional aggregation for a single device.
//!
//! Keeps running min/max bounds and a centroid of every valid fix attributed
//! to a device. Invalid fixes are ignored and never reset the aggregate.

use serde::{Deserialize, Serialize};

use crate::model::Fix;

/// Running min/max/centroid of the fixes seen with one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionAggregate {
    valid: bool,
    min_lat: f64,
    min_lon: f64,
    min_alt: f64,
    min_spd: f64,
    max_lat: f64,
    max_lon: f64,
    max_alt: f64,
    max_spd: f64,
    sum_lat: f64,
    sum_lon: f64,
    sum_alt: f64,
    count: u64,
}

impl PositionAggregate {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an aggregate seeded from `fix`, or `None` if the fix is invalid.
    pub fn from_fix(fix: &Fix) -> Option<Self> {
        if !fix.is_usable() {
            return None;
        }
        let mut agg = Self::new();
        agg.fold(fix);
        Some(agg)
    }

    /// Fold one sample into the aggregate.
    pub fn fold(&mut self, fix: &Fix) {
        if !fix.is_usable() {
            return;
        }

        if self.count == 0 {
            self.valid = true;
            self.min_lat = fix.lat;
            self.max_lat = fix.lat;
            self.min_lon = fix.lon;
            self.max_lon = fix.lon;
            self.min_alt = fix.alt;
            self.max_alt = fix.alt;
            self.min_spd = fix.speed;
            self.max_spd = fix.speed;
            self.sum_lat = fix.lat;
            self.sum_lon = fix.lon;
            self.sum_alt = fix.alt;
            self.count = 1;
            return;
        }

        self.min_lat = self.min_lat.min(fix.lat);
        self.max_lat = self.max_lat.max(fix.lat);
        self.min_lon = self.min_lon.min(fix.lon);
        self.max_lon = self.max_lon.max(fix.lon);
        self.min_alt = self.min_alt.min(fix.alt);
        self.max_alt = self.max_alt.max(fix.alt);
        self.min_spd = self.min_spd.min(fix.speed);
        self.max_spd = self.max_spd.max(fix.speed);
        self.sum_lat += fix.lat;
        self.sum_lon += fix.lon;
        self.sum_alt += fix.alt;
        self.count += 1;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    pub fn min_alt(&self) -> f64 {
        self.min_alt
    }

    pub fn max_alt(&self) -> f64 {
        self.max_alt
    }

    pub fn min_speed(&self) -> f64 {
        self.min_spd
    }

    pub fn max_speed(&self) -> f64 {
        self.max_spd
    }

    /// Mean latitude, or 0.0 before the first valid fix.
    pub fn centroid_lat(&self) -> f64 {
        self.mean(self.sum_lat, self.min_lat, self.max_lat)
    }

    /// Mean longitude, or 0.0 before the first valid fix.
    pub fn centroid_lon(&self) -> f64 {
        self.mean(self.sum_lon, self.min_lon, self.max_lon)
    }

    /// Mean altitude, or 0.0 before the first valid fix.
    pub fn centroid_alt(&self) -> f64 {
        self.mean(self.sum_alt, self.min_alt, self.max_alt)
    }

    // Clamped so rounding in the running sum can't push the mean past a bound.
    fn mean(&self, sum: f64, min: f64, max: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (sum / self.count as f64).clamp(min, max)
        }
    }
}
