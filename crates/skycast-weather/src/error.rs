use skycast_core::UserMessage;
use skycast_sync::SyncError;
use thiserror::Error;

/// Errors raised while building weather and geocoding requests.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Invalid {field} URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

impl UserMessage for WeatherError {
    fn user_message(&self) -> &'static str {
        match self {
            WeatherError::InvalidCoordinates { .. } => "That location is not valid.",
            WeatherError::EmptyQuery => "Enter a place to search for.",
            WeatherError::InvalidUrl { .. } => "Weather service settings are invalid.",
        }
    }
}

impl From<WeatherError> for SyncError {
    fn from(err: WeatherError) -> Self {
        SyncError::planning(err.to_string())
    }
}
