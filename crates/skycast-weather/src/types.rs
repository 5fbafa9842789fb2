use serde::{Deserialize, Serialize};
use skycast_sync::{normalize_query, SyncPayload};

use crate::error::WeatherError;

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WeatherError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(WeatherError::InvalidCoordinates {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn fetch_weather(self) -> SyncPayload {
        SyncPayload::FetchWeather {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn reverse_geocode(self) -> SyncPayload {
        SyncPayload::ReverseGeocode {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Payload for a place-name search. Blank queries are rejected.
pub fn search_location(query: &str) -> Result<SyncPayload, WeatherError> {
    let normalized = normalize_query(query);
    if normalized.is_empty() {
        return Err(WeatherError::EmptyQuery);
    }
    Ok(SyncPayload::SearchLocation {
        query: query.trim().to_string(),
    })
}
