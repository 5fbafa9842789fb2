//! Weather and location payloads for Skycast.
//!
//! Validated coordinates, payload constructors and the Open-Meteo request
//! planner used by the background sync queue.

pub mod error;
pub mod planner;
pub mod types;

pub use error::WeatherError;
pub use planner::{
    OpenMeteoPlanner, FORECAST_ENDPOINT, GEOCODING_ENDPOINT, REVERSE_GEOCODE_ENDPOINT,
};
pub use types::{search_location, Coordinates};
