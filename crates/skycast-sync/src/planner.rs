use skycast_cache::SetOptions;
use skycast_net::ApiRequest;

use crate::error::SyncResult;
use crate::task::SyncPayload;

/// How to fetch a payload and where to cache the result.
#[derive(Debug, Clone)]
pub struct PlannedRequest {
    pub request: ApiRequest,
    pub cache_key: String,
    pub cache_options: SetOptions,
}

/// Maps task payloads onto upstream requests.
pub trait RequestPlanner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Planning`] for payloads that can never be
    /// sent; the task is failed without a network attempt.
    fn plan(&self, payload: &SyncPayload) -> SyncResult<PlannedRequest>;
}
