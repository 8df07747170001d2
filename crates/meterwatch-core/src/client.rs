//! HTTP client for the billing API.
//!
//! This module turns one meter plus the shared credential into either a
//! [`Reading`] or a classified [`FetchError`]. It performs exactly one
//! request per call; retries are the poller's job.
//!
//! # Example
//!
//! ```no_run
//! use meterwatch_core::{ApiClient, ApiSettings, AuthContext};
//! use meterwatch_types::Meter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(ApiSettings::new("https://api.example.com"))?;
//! let auth = AuthContext::new("merchant-token");
//!
//! let reading = client.fetch_reading(&Meter::new("M1", "Unit A"), &auth).await?;
//! println!("kWh: {:?}", reading.measurement("kwh"));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use meterwatch_types::{Meter, Reading};

use crate::auth::AuthContext;
use crate::error::{ClientError, FetchError, Result};
use crate::traits::MeterApi;

/// Header carrying the merchant credential unless configured otherwise.
pub const DEFAULT_TOKEN_HEADER: &str = "x-merchant-token";
/// Path of the per-meter status endpoint; `{id}` is replaced by the meter id.
pub const DEFAULT_READING_PATH: &str = "/merchant/meter/{id}/sync-status";
/// Path of the meter listing endpoint.
pub const DEFAULT_DISCOVERY_PATH: &str = "/merchant/meters";
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const METER_ID_PLACEHOLDER: &str = "{id}";

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Base URL, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Name of the header that carries the credential.
    pub token_header: String,
    /// Reading endpoint path template.
    pub reading_path: String,
    /// Meter listing endpoint path.
    pub discovery_path: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            reading_path: DEFAULT_READING_PATH.to_string(),
            discovery_path: DEFAULT_DISCOVERY_PATH.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: None,
            origin: None,
            referer: None,
        }
    }
}

impl ApiSettings {
    /// Settings with default paths and headers for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn token_header(mut self, name: impl Into<String>) -> Self {
        self.token_header = name.into();
        self
    }

    #[must_use]
    pub fn reading_path(mut self, path: impl Into<String>) -> Self {
        self.reading_path = path.into();
        self
    }

    #[must_use]
    pub fn discovery_path(mut self, path: impl Into<String>) -> Self {
        self.discovery_path = path.into();
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }

    #[must_use]
    pub fn origin(mut self, value: impl Into<String>) -> Self {
        self.origin = Some(value.into());
        self
    }

    #[must_use]
    pub fn referer(mut self, value: impl Into<String>) -> Self {
        self.referer = Some(value.into());
        self
    }
}

/// HTTP client for the billing API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token_header: HeaderName,
    reading_path: String,
    discovery_path: String,
}

impl ApiClient {
    /// Create a new client.
    ///
    /// The base URL must start with `http://` or `https://`; a trailing
    /// slash is removed.
    pub fn new(settings: ApiSettings) -> std::result::Result<Self, ClientError> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let token_header = HeaderName::from_bytes(settings.token_header.as_bytes()).map_err(
            |e| ClientError::InvalidHeader {
                name: settings.token_header.clone(),
                message: e.to_string(),
            },
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in [
            (header::USER_AGENT, &settings.user_agent),
            (header::ORIGIN, &settings.origin),
            (header::REFERER, &settings.referer),
        ] {
            if let Some(value) = value {
                let value =
                    HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeader {
                        name: name.to_string(),
                        message: e.to_string(),
                    })?;
                headers.insert(name, value);
            }
        }

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token_header,
            reading_path: settings.reading_path,
            discovery_path: settings.discovery_path,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of the reading endpoint for a meter.
    pub fn reading_url(&self, meter_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.reading_path.replace(METER_ID_PLACEHOLDER, meter_id)
        )
    }

    fn discovery_url(&self) -> String {
        format!("{}{}", self.base_url, self.discovery_path)
    }

    /// Fetch the current reading for a meter.
    ///
    /// Sends a single request. Returns [`FetchError::AuthRejected`] without
    /// any network traffic when the context is already rejected. A 401 or
    /// 403 response is reported but does not mark the context; that is the
    /// caller's decision.
    pub async fn fetch_reading(&self, meter: &Meter, auth: &AuthContext) -> Result<Reading> {
        let url = self.reading_url(&meter.id);
        debug!(meter = %meter.id, "Fetching reading");

        let body = self.get_json(&url, auth).await?;
        Reading::from_response(&meter.id, &body).map_err(|e| {
            warn!(meter = %meter.id, error = %e, "Unexpected reading payload");
            FetchError::from(e)
        })
    }

    /// List the meters visible to the credential.
    ///
    /// Expects `{"data": [{"meter": {"id": .., "name": ..}}, ..]}`. Entries
    /// without an id or name are skipped; numeric ids are stringified.
    pub async fn list_meters(&self, auth: &AuthContext) -> Result<Vec<Meter>> {
        let url = self.discovery_url();
        let body = self.get_json(&url, auth).await?;
        parse_meter_list(&body)
    }

    async fn get_json(&self, url: &str, auth: &AuthContext) -> Result<Value> {
        if auth.is_rejected() {
            return Err(FetchError::AuthRejected { status: None });
        }

        let mut token = HeaderValue::from_str(auth.credential())
            .map_err(|_| FetchError::AuthRejected { status: None })?;
        token.set_sensitive(true);

        let response = self
            .client
            .get(url)
            .header(self.token_header.clone(), token)
            .send()
            .await
            .map_err(|e| FetchError::NetworkFailure(describe_transport_error(url, &e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return Err(classify_status(status, retry_after));
        }

        let bytes = response.bytes().await.map_err(|e| {
            FetchError::NetworkFailure(format!("failed to read response body from {}: {}", url, e))
        })?;

        serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::MalformedResponse(format!("invalid JSON: {}", e)))
    }
}

#[async_trait]
impl MeterApi for ApiClient {
    async fn fetch_reading(&self, meter: &Meter, auth: &AuthContext) -> Result<Reading> {
        ApiClient::fetch_reading(self, meter, auth).await
    }

    async fn list_meters(&self, auth: &AuthContext) -> Result<Vec<Meter>> {
        ApiClient::list_meters(self, auth).await
    }
}

/// Map a non-success HTTP status to a failure.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AuthRejected {
            status: Some(status.as_u16()),
        },
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        StatusCode::SERVICE_UNAVAILABLE if retry_after.is_some() => {
            FetchError::RateLimited { retry_after }
        }
        s if s.is_server_error() => FetchError::NetworkFailure(format!("server error: HTTP {}", s)),
        s => FetchError::MalformedResponse(format!("unexpected status: HTTP {}", s)),
    }
}

/// Parse the delay-seconds form of `Retry-After`.
///
/// The HTTP-date form is not supported and yields `None`.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn describe_transport_error(url: &str, err: &reqwest::Error) -> String {
    let what = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    format!("{} for {}: {}", what, url, err)
}

fn parse_meter_list(body: &Value) -> Result<Vec<Meter>> {
    let entries = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FetchError::MalformedResponse("meter list has no 'data' array".to_string())
        })?;

    let meters = entries
        .iter()
        .filter_map(|entry| {
            let meter = entry.get("meter")?;
            let id = match meter.get("id")? {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let name = meter.get("name")?.as_str()?.to_string();
            Some(Meter::new(id, name))
        })
        .collect();

    Ok(meters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn client_for(server: &mockito::Server) -> ApiClient {
        ApiClient::new(ApiSettings::new(server.url())).unwrap()
    }

    fn meter() -> Meter {
        Meter::new("M1", "Unit A")
    }

    #[test]
    fn test_client_normalizes_url() {
        let client = ApiClient::new(ApiSettings::new("http://localhost:8080/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(
            client.reading_url("42"),
            "http://localhost:8080/merchant/meter/42/sync-status"
        );
    }

    #[test]
    fn test_client_invalid_url() {
        let result = ApiClient::new(ApiSettings::new("localhost:8080"));
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_client_invalid_token_header() {
        let result = ApiClient::new(ApiSettings::new("http://localhost").token_header("bad header"));
        assert!(matches!(result, Err(ClientError::InvalidHeader { .. })));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            FetchError::AuthRejected { status: Some(401) }
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None),
            FetchError::AuthRejected { status: Some(403) }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None),
            FetchError::RateLimited { retry_after: None }
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, Some(Duration::from_secs(5))),
            FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None),
            FetchError::NetworkFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            FetchError::NetworkFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None),
            FetchError::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_parse_meter_list() {
        let body = json!({
            "data": [
                { "meter": { "id": "A1", "name": "Unit A" } },
                { "meter": { "id": 17, "name": "Unit B" } },
                { "meter": { "id": "C3" } },
                { "other": {} }
            ]
        });
        let meters = parse_meter_list(&body).unwrap();
        assert_eq!(
            meters,
            vec![Meter::new("A1", "Unit A"), Meter::new("17", "Unit B")]
        );
    }

    #[test]
    fn test_parse_meter_list_without_data() {
        let err = parse_meter_list(&json!({ "meters": [] })).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_reading_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .match_header("x-merchant-token", "tok")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"timestamp": "2024-01-01T00:00:00Z", "kwh": 123.4}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let auth = AuthContext::new("tok");
        let reading = client.fetch_reading(&meter(), &auth).await.unwrap();

        assert_eq!(reading.meter_id, "M1");
        assert_eq!(reading.timestamp, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(reading.measurement("kwh"), Some(123.4));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_reading_sends_optional_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/meters/M1")
            .match_header("x-api-key", "tok")
            .match_header("user-agent", "meterwatch-test")
            .match_header("origin", "https://portal.example.com")
            .match_header("referer", "https://portal.example.com/")
            .with_status(200)
            .with_body(r#"{"timestamp": 1704067200, "kwh": 1.0}"#)
            .create_async()
            .await;

        let settings = ApiSettings::new(server.url())
            .token_header("x-api-key")
            .reading_path("/v2/meters/{id}")
            .user_agent("meterwatch-test")
            .origin("https://portal.example.com")
            .referer("https://portal.example.com/");
        let client = ApiClient::new(settings).unwrap();

        let reading = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap();
        assert_eq!(reading.measurement("kwh"), Some(1.0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_reading_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server);
        let auth = AuthContext::new("expired");
        let err = client.fetch_reading(&meter(), &auth).await.unwrap_err();

        assert_eq!(err, FetchError::AuthRejected { status: Some(401) });
        // The client reports, the caller decides.
        assert!(!auth.is_rejected());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_reading_rejected_context_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server);
        let auth = AuthContext::new("tok");
        auth.mark_rejected();

        let err = client.fetch_reading(&meter(), &auth).await.unwrap_err();
        assert_eq!(err, FetchError::AuthRejected { status: None });
        let err = client.list_meters(&auth).await.unwrap_err();
        assert_eq!(err, FetchError::AuthRejected { status: None });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_reading_rate_limited_with_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .with_status(429)
            .with_header("retry-after", "12")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_reading_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .with_status(500)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_fetch_reading_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_reading_missing_fields() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/merchant/meter/M1/sync-status")
            .with_status(200)
            .with_body(r#"{"data": {"status": "online"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_reading_connection_refused() {
        // Port 1 is reserved and nothing listens there in test environments.
        let client = ApiClient::new(ApiSettings::new("http://127.0.0.1:1")).unwrap();
        let err = client
            .fetch_reading(&meter(), &AuthContext::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_list_meters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/merchant/meters")
            .match_header("x-merchant-token", "tok")
            .with_status(200)
            .with_body(r#"{"data": [{"meter": {"id": 1, "name": "Unit A"}}, {"meter": {"id": "2", "name": "Unit B"}}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let meters = client.list_meters(&AuthContext::new("tok")).await.unwrap();
        assert_eq!(meters, vec![Meter::new("1", "Unit A"), Meter::new("2", "Unit B")]);
        mock.assert_async().await;
    }
}
