//! Scripted API implementation for testing.
//!
//! This module provides a mock billing API that can be used for unit and
//! integration tests without a network.
//!
//! The [`MockApi`] implements the [`MeterApi`] trait, allowing it to be
//! used interchangeably with [`ApiClient`](crate::ApiClient) in generic code.
//!
//! # Features
//!
//! - **Scripted responses**: Queue payloads or failures per meter
//! - **Fallback responses**: Answer every further call the same way
//! - **Call recording**: Inspect which meters were requested and when
//! - **Latency simulation**: Add artificial delays to each request

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use meterwatch_types::{Meter, Reading};

use crate::auth::AuthContext;
use crate::error::{FetchError, Result};
use crate::traits::MeterApi;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A response body, parsed exactly as the HTTP client would parse it.
    Payload(Value),
    /// A classified failure.
    Error(FetchError),
}

/// A request that reached the mock (i.e. would have hit the network).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub meter_id: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    queues: HashMap<String, VecDeque<MockResponse>>,
    fallbacks: HashMap<String, MockResponse>,
    meters: Vec<Meter>,
    discovery_error: Option<FetchError>,
    calls: Vec<MockCall>,
    discovery_calls: u32,
}

/// A scripted billing API for tests.
///
/// # Example
///
/// ```
/// use meterwatch_core::{AuthContext, MeterApi, MockApi};
/// use meterwatch_types::Meter;
///
/// #[tokio::main]
/// async fn main() {
///     let api = MockApi::new();
///     api.push_payload("M1", serde_json::json!({
///         "timestamp": "2024-01-01T00:00:00Z",
///         "kwh": 123.4
///     }));
///
///     let auth = AuthContext::new("token");
///     let reading = api.fetch_reading(&Meter::new("M1", ""), &auth).await.unwrap();
///     assert_eq!(reading.measurement("kwh"), Some(123.4));
///     assert_eq!(api.call_count(), 1);
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a request round-trip time.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Meters returned by [`MeterApi::list_meters`].
    #[must_use]
    pub fn with_meters(self, meters: Vec<Meter>) -> Self {
        self.lock().meters = meters;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response for the next request for `meter_id`.
    pub fn push(&self, meter_id: &str, response: MockResponse) {
        self.lock()
            .queues
            .entry(meter_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a response body.
    pub fn push_payload(&self, meter_id: &str, body: Value) {
        self.push(meter_id, MockResponse::Payload(body));
    }

    /// Queue a failure.
    pub fn push_error(&self, meter_id: &str, error: FetchError) {
        self.push(meter_id, MockResponse::Error(error));
    }

    /// Answer every request for `meter_id` with `response` once its queue is empty.
    pub fn set_fallback(&self, meter_id: &str, response: MockResponse) {
        self.lock()
            .fallbacks
            .insert(meter_id.to_string(), response);
    }

    /// Make meter discovery fail.
    pub fn fail_discovery(&self, error: FetchError) {
        self.lock().discovery_error = Some(error);
    }

    /// Every reading request that reached the mock, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of reading requests that reached the mock.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of reading requests for one meter.
    pub fn calls_for(&self, meter_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.meter_id == meter_id)
            .count()
    }

    pub fn discovery_calls(&self) -> u32 {
        self.lock().discovery_calls
    }

    fn next_response(&self, meter_id: &str) -> MockResponse {
        let mut state = self.lock();
        state.calls.push(MockCall {
            meter_id: meter_id.to_string(),
            at: Instant::now(),
        });

        if let Some(response) = state.queues.get_mut(meter_id).and_then(VecDeque::pop_front) {
            return response;
        }

        state.fallbacks.get(meter_id).cloned().unwrap_or_else(|| {
            MockResponse::Error(FetchError::MalformedResponse(format!(
                "no scripted response for meter {}",
                meter_id
            )))
        })
    }
}

#[async_trait]
impl MeterApi for MockApi {
    async fn fetch_reading(&self, meter: &Meter, auth: &AuthContext) -> Result<Reading> {
        if auth.is_rejected() {
            return Err(FetchError::AuthRejected { status: None });
        }

        let response = self.next_response(&meter.id);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            MockResponse::Payload(body) => Ok(Reading::from_response(&meter.id, &body)?),
            MockResponse::Error(error) => Err(error),
        }
    }

    async fn list_meters(&self, auth: &AuthContext) -> Result<Vec<Meter>> {
        if auth.is_rejected() {
            return Err(FetchError::AuthRejected { status: None });
        }

        let mut state = self.lock();
        state.discovery_calls += 1;
        match &state.discovery_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.meters.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meter(id: &str) -> Meter {
        Meter::new(id, "")
    }

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let api = MockApi::new();
        api.push_error("M1", FetchError::NetworkFailure("down".into()));
        api.push_payload("M1", json!({ "timestamp": "2024-01-01T00:00:00Z", "kwh": 1.0 }));

        let auth = AuthContext::new("t");
        let first = api.fetch_reading(&meter("M1"), &auth).await;
        assert!(matches!(first, Err(FetchError::NetworkFailure(_))));

        let second = api.fetch_reading(&meter("M1"), &auth).await.unwrap();
        assert_eq!(second.measurement("kwh"), Some(1.0));
        assert_eq!(api.calls_for("M1"), 2);
    }

    #[tokio::test]
    async fn test_unscripted_meter_is_malformed() {
        let api = MockApi::new();
        let err = api
            .fetch_reading(&meter("M9"), &AuthContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fallback_repeats() {
        let api = MockApi::new();
        api.set_fallback(
            "M1",
            MockResponse::Error(FetchError::RateLimited { retry_after: None }),
        );
        let auth = AuthContext::new("t");
        for _ in 0..3 {
            let err = api.fetch_reading(&meter("M1"), &auth).await.unwrap_err();
            assert_eq!(err, FetchError::RateLimited { retry_after: None });
        }
        assert_eq!(api.call_count(), 3);
    }

    #[tokio::test]
    async fn test_payload_is_parsed_like_http_client() {
        let api = MockApi::new();
        api.push_payload("M1", json!({ "data": { "timestamp": "bad", "kwh": 1.0 } }));
        let err = api
            .fetch_reading(&meter("M1"), &AuthContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_rejected_context_is_not_recorded() {
        let api = MockApi::new();
        let auth = AuthContext::new("t");
        auth.mark_rejected();

        let err = api.fetch_reading(&meter("M1"), &auth).await.unwrap_err();
        assert_eq!(err, FetchError::AuthRejected { status: None });
        assert!(api.list_meters(&auth).await.is_err());
        assert_eq!(api.call_count(), 0);
        assert_eq!(api.discovery_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_meters() {
        let api = MockApi::new().with_meters(vec![Meter::new("A", "Unit A")]);
        let meters = api.list_meters(&AuthContext::new("t")).await.unwrap();
        assert_eq!(meters, vec![Meter::new("A", "Unit A")]);

        api.fail_discovery(FetchError::NetworkFailure("down".into()));
        assert!(api.list_meters(&AuthContext::new("t")).await.is_err());
        assert_eq!(api.discovery_calls(), 2);
    }
}
