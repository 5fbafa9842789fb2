//! Maps sync payloads onto Open-Meteo and Nominatim requests.

use std::time::Duration;

use skycast_cache::{CachePriority, SetOptions};
use skycast_core::{TemperatureUnit, WeatherConfig};
use skycast_net::ApiRequest;
use skycast_sync::{PlannedRequest, RequestPlanner, SyncPayload, SyncResult};
use url::Url;

use crate::error::WeatherError;
use crate::types::Coordinates;

/// Breaker endpoint keys.
pub const FORECAST_ENDPOINT: &str = "forecast";
pub const GEOCODING_ENDPOINT: &str = "geocoding";
pub const REVERSE_GEOCODE_ENDPOINT: &str = "reverse_geocode";

const CURRENT_FIELDS: &str =
    "temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,weather_code";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max,sunrise,sunset";
const FORECAST_DAYS: &str = "7";
const SEARCH_RESULTS: &str = "10";

const SEARCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const PLACE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct OpenMeteoPlanner {
    forecast_url: Url,
    geocoding_url: Url,
    reverse_geocode_url: Url,
    temperature_unit: TemperatureUnit,
    weather_ttl: Duration,
}

impl OpenMeteoPlanner {
    pub fn new(config: &WeatherConfig) -> Result<Self, WeatherError> {
        let parse = |field: &'static str, value: &str| {
            Url::parse(value).map_err(|source| WeatherError::InvalidUrl { field, source })
        };

        Ok(Self {
            forecast_url: parse("forecast", &config.forecast_url)?,
            geocoding_url: parse("geocoding", &config.geocoding_url)?,
            reverse_geocode_url: parse("reverse geocode", &config.reverse_geocode_url)?,
            temperature_unit: config.temperature_unit,
            weather_ttl: Duration::from_secs(u64::from(config.refresh_minutes.max(1)) * 60),
        })
    }

    fn forecast(&self, coords: Coordinates) -> ApiRequest {
        let mut url = self.forecast_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("latitude", &coords.latitude.to_string())
                .append_pair("longitude", &coords.longitude.to_string())
                .append_pair("current", CURRENT_FIELDS)
                .append_pair("daily", DAILY_FIELDS)
                .append_pair("timezone", "auto")
                .append_pair("forecast_days", FORECAST_DAYS);
            if self.temperature_unit == TemperatureUnit::Fahrenheit {
                query
                    .append_pair("temperature_unit", "fahrenheit")
                    .append_pair("wind_speed_unit", "mph");
            }
        }
        ApiRequest::get(FORECAST_ENDPOINT, url)
    }

    fn search(&self, query: &str) -> ApiRequest {
        let mut url = self.geocoding_url.clone();
        url.query_pairs_mut()
            .append_pair("name", query.trim())
            .append_pair("count", SEARCH_RESULTS)
            .append_pair("language", "en")
            .append_pair("format", "json");
        ApiRequest::get(GEOCODING_ENDPOINT, url)
    }

    fn reverse(&self, coords: Coordinates) -> ApiRequest {
        let mut url = self.reverse_geocode_url.clone();
        url.query_pairs_mut()
            .append_pair("lat", &coords.latitude.to_string())
            .append_pair("lon", &coords.longitude.to_string())
            .append_pair("format", "json")
            .append_pair("addressdetails", "1")
            .append_pair("layer", "address")
            .append_pair("zoom", "10");
        ApiRequest::get(REVERSE_GEOCODE_ENDPOINT, url).with_header("Accept", "application/json")
    }
}

impl RequestPlanner for OpenMeteoPlanner {
    fn plan(&self, payload: &SyncPayload) -> SyncResult<PlannedRequest> {
        let (request, cache_options) = match payload {
            SyncPayload::FetchWeather {
                latitude,
                longitude,
            } => (
                self.forecast(Coordinates::new(*latitude, *longitude)?),
                SetOptions::new(self.weather_ttl, CachePriority::High),
            ),
            SyncPayload::SearchLocation { query } => {
                if query.trim().is_empty() {
                    return Err(WeatherError::EmptyQuery.into());
                }
                (
                    self.search(query),
                    SetOptions::new(SEARCH_TTL, CachePriority::Medium),
                )
            }
            SyncPayload::ReverseGeocode {
                latitude,
                longitude,
            } => (
                self.reverse(Coordinates::new(*latitude, *longitude)?),
                SetOptions::new(PLACE_TTL, CachePriority::Low),
            ),
        };

        tracing::trace!(operation = payload.operation(), url = %request.url, "Planned request");
        Ok(PlannedRequest {
            request,
            cache_key: payload.key(),
            cache_options,
        })
    }
}
