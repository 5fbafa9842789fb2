//! The resilience manager: every outbound call goes through [`ResilienceManager::execute`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use skycast_core::{Priority, ResilienceConfig, SharedClock};

use crate::breaker::{AdmissionGuard, BreakerConfig, CircuitBreakers, CircuitStatus};
use crate::error::NetworkError;
use crate::gate::PriorityGate;
use crate::request::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use crate::retry::RetryPolicy;

/// Per-call overrides. Unset fields fall back to the manager's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl ExecuteOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    timeout: Duration,
    max_retries: u32,
    breakers: CircuitBreakers,
    gate: Option<PriorityGate>,
    online: watch::Sender<bool>,
}

/// Cloneable handle; clones share breakers, the concurrency gate and the
/// online flag.
#[derive(Clone)]
pub struct ResilienceManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceManager")
            .field("retry", &self.inner.retry)
            .field("timeout", &self.inner.timeout)
            .field("max_retries", &self.inner.max_retries)
            .field("gate", &self.inner.gate)
            .field("online", &self.is_online())
            .finish()
    }
}

impl ResilienceManager {
    pub fn new(config: &ResilienceConfig, transport: Arc<dyn Transport>, clock: SharedClock) -> Self {
        let breakers = CircuitBreakers::new(
            BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                cooldown: config.cooldown(),
            },
            clock,
        );
        let gate = (config.max_concurrent > 0).then(|| PriorityGate::new(config.max_concurrent));
        let (online, _) = watch::channel(true);

        Self {
            inner: Arc::new(Inner {
                transport,
                retry: RetryPolicy::from(config),
                timeout: config.timeout(),
                max_retries: config.max_retries,
                breakers,
                gate,
                online,
            }),
        }
    }

    /// Build a manager backed by a real HTTP client.
    pub fn with_reqwest(config: &ResilienceConfig, clock: SharedClock) -> Result<Self, NetworkError> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::new(config, Arc::new(transport), clock))
    }

    /// Send `request`, retrying transient failures with exponential backoff.
    ///
    /// The breaker for `request.endpoint` is consulted first; an open breaker
    /// fails fast with [`NetworkError::CircuitOpen`]. A half-open trial makes a
    /// single attempt. The breaker is updated once per call with the final
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error when retries are exhausted or the
    /// failure is not retryable.
    pub async fn execute(
        &self,
        request: ApiRequest,
        options: ExecuteOptions,
    ) -> Result<ApiResponse, NetworkError> {
        if !self.is_online() {
            tracing::debug!(endpoint = %request.endpoint, "Offline, skipping request");
            return Err(NetworkError::Offline);
        }

        let admission = self.inner.breakers.admit(&request.endpoint)?;
        let _permit = match &self.inner.gate {
            Some(gate) => Some(gate.acquire(options.priority).await),
            None => None,
        };

        let timeout = options.timeout.unwrap_or(self.inner.timeout);
        let max_retries = if admission.is_trial() {
            0
        } else {
            options.max_retries.unwrap_or(self.inner.max_retries)
        };
        let max_attempts = max_retries.saturating_add(1);

        let mut attempt = 1;
        loop {
            match self.attempt(&request, timeout).await {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(
                            endpoint = %request.endpoint,
                            "Request succeeded after {} retries",
                            attempt - 1
                        );
                    }
                    admission.succeed();
                    return Ok(response);
                }
                Err(err) => {
                    let exhausted = attempt >= max_attempts;
                    if !err.is_retryable() || exhausted {
                        if err.is_retryable() {
                            tracing::error!(
                                endpoint = %request.endpoint,
                                "Request failed after {} attempts: {}",
                                attempt,
                                err
                            );
                        } else {
                            tracing::debug!(endpoint = %request.endpoint, "Non-retryable error: {}", err);
                        }
                        settle(admission, &err);
                        return Err(err);
                    }

                    attempt += 1;
                    let delay = self.inner.retry.delay_before_attempt(attempt);
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        "Retry attempt {} of {} in {:?}: {}",
                        attempt,
                        max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;

                    if !self.is_online() || self.inner.breakers.is_open(&request.endpoint) {
                        tracing::debug!(endpoint = %request.endpoint, "Stopping retries");
                        settle(admission, &err);
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest, timeout: Duration) -> Result<ApiResponse, NetworkError> {
        let timeout_ms = timeout.as_millis() as u64;
        let response = match tokio::time::timeout(timeout, self.inner.transport.send(request)).await {
            Ok(result) => result.map_err(|e| match e {
                NetworkError::Timeout { endpoint, .. } => NetworkError::Timeout { endpoint, timeout_ms },
                other => other,
            })?,
            Err(_) => {
                return Err(NetworkError::Timeout {
                    endpoint: request.endpoint.clone(),
                    timeout_ms,
                })
            }
        };

        match response.status {
            500..=u16::MAX => Err(NetworkError::Server {
                endpoint: request.endpoint.clone(),
                status: response.status,
            }),
            400..=499 => Err(NetworkError::Client {
                endpoint: request.endpoint.clone(),
                status: response.status,
            }),
            _ => Ok(response),
        }
    }

    /// Backoff schedule used between attempts.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    pub fn breaker_status(&self, endpoint: &str) -> CircuitStatus {
        self.inner.breakers.status(endpoint)
    }

    pub fn reset_breaker(&self, endpoint: &str) {
        self.inner.breakers.reset(endpoint);
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.send_replace(online);
        if previous != online {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Receiver that observes every connectivity change.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }
}

/// Report a failed call to its breaker.
fn settle(admission: AdmissionGuard, err: &NetworkError) {
    match err {
        e if e.counts_against_breaker() => admission.fail(),
        // The endpoint answered, so it is healthy.
        NetworkError::Client { .. } => admission.succeed(),
        _ => admission.abandon(),
    }
}
