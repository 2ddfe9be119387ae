//! Journey snapshot model
//!
//! A `JourneyData` is the immutable result of one completed update cycle:
//! the two resolved locations and the travel time between them.

use serde::Serialize;

/// Round to the nearest integer, ties to even
#[inline]
fn round_half_even(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// A resolved location: display name (if any) and coordinates or address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationData {
    pub name: Option<String>,
    /// `"lat,lon"` or an opaque address/state string
    pub coords: String,
}

impl LocationData {
    pub fn named(name: impl Into<String>, coords: impl Into<String>) -> Self {
        Self { name: Some(name.into()), coords: coords.into() }
    }

    pub fn raw(coords: impl Into<String>) -> Self {
        Self { name: None, coords: coords.into() }
    }
}

/// Travel time measurement returned by a routing provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelTimeData {
    /// Provider's resolved origin address
    pub origin: Option<String>,
    /// Provider's resolved destination address
    pub destination: Option<String>,
    pub travel_time_secs: u64,
    pub travel_time_traffic_secs: u64,
    pub distance_m: u64,
}

impl TravelTimeData {
    /// Zero-duration, zero-distance measurement for origin == destination
    pub fn stationary() -> Self {
        Self {
            origin: None,
            destination: None,
            travel_time_secs: 0,
            travel_time_traffic_secs: 0,
            distance_m: 0,
        }
    }

    pub fn travel_time_min(&self) -> i64 {
        round_half_even(self.travel_time_secs as f64 / 60.0)
    }

    pub fn travel_time_traffic_min(&self) -> i64 {
        round_half_even(self.travel_time_traffic_secs as f64 / 60.0)
    }

    /// Extra seconds caused by traffic; negative when traffic is lighter than usual
    pub fn delay_secs(&self) -> i64 {
        self.travel_time_traffic_secs as i64 - self.travel_time_secs as i64
    }

    pub fn delay_min(&self) -> i64 {
        round_half_even(self.delay_secs() as f64 / 60.0)
    }

    /// Delay as a percentage of the nominal travel time.
    ///
    /// Returns 0 when the nominal time is 0, which is a divide-by-zero guard
    /// rather than a "no delay" signal.
    pub fn delay_factor(&self) -> i64 {
        if self.travel_time_secs == 0 {
            return 0;
        }
        round_half_even(100.0 * self.delay_secs() as f64 / self.travel_time_secs as f64)
    }
}

/// One update cycle's snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyData {
    pub origin: LocationData,
    pub destination: LocationData,
    pub travel_time: TravelTimeData,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn travel(secs: u64, traffic_secs: u64) -> TravelTimeData {
        TravelTimeData {
            origin: None,
            destination: None,
            travel_time_secs: secs,
            travel_time_traffic_secs: traffic_secs,
            distance_m: 1000,
        }
    }

    #[test]
    fn test_delay_values() {
        let data = travel(600, 900);
        assert_eq!(data.delay_secs(), 300);
        assert_eq!(data.delay_min(), 5);
        assert_eq!(data.delay_factor(), 50);
        assert_eq!(data.travel_time_min(), 10);
        assert_eq!(data.travel_time_traffic_min(), 15);
    }

    #[test]
    fn test_delay_factor_zero_duration() {
        assert_eq!(travel(0, 0).delay_factor(), 0);
        assert_eq!(travel(0, 120).delay_factor(), 0);
    }

    #[test]
    fn test_delay_factor_rounds() {
        // 100 * 100 / 300 = 33.33
        assert_eq!(travel(300, 400).delay_factor(), 33);
        // 100 * 200 / 300 = 66.67
        assert_eq!(travel(300, 500).delay_factor(), 67);
    }

    #[test]
    fn test_negative_delay() {
        let data = travel(900, 600);
        assert_eq!(data.delay_secs(), -300);
        assert_eq!(data.delay_min(), -5);
        assert_eq!(data.delay_factor(), -33);
    }

    #[test]
    fn test_minutes_round_half_to_even() {
        // 150s = 2.5 min, 90s = 1.5 min
        assert_eq!(travel(150, 90).travel_time_min(), 2);
        assert_eq!(travel(150, 90).travel_time_traffic_min(), 2);
    }

    #[test]
    fn test_stationary() {
        let data = TravelTimeData::stationary();
        assert_eq!(data.travel_time_traffic_min(), 0);
        assert_eq!(data.distance_m, 0);
        assert_eq!(data.delay_factor(), 0);
    }
}
