//! Network resilience for upstream weather and geocoding APIs.
//!
//! [`ResilienceManager::execute`] wraps every outbound request with a
//! per-endpoint circuit breaker, a per-attempt timeout, exponential backoff
//! retries and a priority-ordered concurrency limit.

pub mod breaker;
pub mod error;
pub mod gate;
pub mod manager;
pub mod request;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreakerState, CircuitBreakers, CircuitStatus};
pub use error::NetworkError;
pub use gate::{GatePermit, PriorityGate};
pub use manager::{ExecuteOptions, ResilienceManager};
pub use request::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
pub use retry::RetryPolicy;
