use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};

use tributary_common::error::{TributaryError, TributaryResult};
use tributary_config::parse_var_or;

use super::models::ApiPage;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub token: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl ApiClientConfig {
    pub fn from_env() -> TributaryResult<Self> {
        let base_url = required("SOURCE_API_BASE_URL")?;
        let token = required("SOURCE_API_TOKEN")?;
        let page_size: u32 = parse_var_or("SOURCE_API_PAGE_SIZE", 100)?;
        let max_retries: u32 = parse_var_or("SOURCE_API_MAX_RETRIES", 3)?;
        let timeout_secs: u64 = parse_var_or("SOURCE_API_TIMEOUT_SECS", 30)?;

        if page_size == 0 {
            return Err(TributaryError::Config(
                "SOURCE_API_PAGE_SIZE must be positive".to_string(),
            ));
        }
        if timeout_secs == 0 {
            return Err(TributaryError::Config(
                "SOURCE_API_TIMEOUT_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            page_size,
            max_retries,
            timeout_secs,
        })
    }
}

fn required(key: &str) -> TributaryResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TributaryError::Config(format!("{key} is required but not set")))
}

const MAX_BACKOFF_SECS: u64 = 30;
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Exponential backoff before retry number `attempt`, capped at 30s.
fn backoff_secs(attempt: u32) -> u64 {
    1u64.checked_shl(attempt)
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECS)
}

/// What to do with a response, by status code alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Accept,
    /// 429: wait for `Retry-After` when the server sends one.
    Throttled,
    /// 5xx: retry with backoff.
    Retry,
    /// Any other 4xx (and unexpected codes): give up on the first attempt.
    Reject,
}

fn classify(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Accept
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Disposition::Throttled
    } else if status.is_server_error() {
        Disposition::Retry
    } else {
        Disposition::Reject
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.min(MAX_RETRY_AFTER_SECS))
}

/// Query for one page of a collection endpoint.
#[derive(Debug, Clone, Default)]
pub struct PageQuery<'a> {
    pub modified_since: Option<DateTime<Utc>>,
    pub modified_until: Option<DateTime<Utc>>,
    pub page_token: Option<&'a str>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: ApiClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    /// Fetch one page of the collection at `path`, retrying transient errors.
    pub async fn fetch_page(
        &self,
        path: &str,
        query: &PageQuery<'_>,
    ) -> Result<ApiPage, ApiClientError> {
        let url = format!("{}/{}", self.config.base_url, path.trim_start_matches('/'));

        let mut params: Vec<(&str, String)> = vec![("limit", self.config.page_size.to_string())];
        if let Some(since) = query.modified_since {
            params.push((
                "modified_since",
                since.to_rfc3339_opts(SecondsFormat::Micros, true),
            ));
        }
        if let Some(until) = query.modified_until {
            params.push((
                "modified_until",
                until.to_rfc3339_opts(SecondsFormat::Micros, true),
            ));
        }
        if let Some(token) = query.page_token {
            params.push(("page_token", token.to_string()));
        }

        let body = self.request_with_retry(&url, &params).await?;
        serde_json::from_str::<ApiPage>(&body).map_err(|e| ApiClientError::Decode(e.to_string()))
    }

    /// GET `url` until it succeeds, fails permanently, or runs out of retries.
    ///
    /// Each failed attempt decides the delay before the next one: a throttled
    /// response waits for its `Retry-After`, anything else transient backs off
    /// exponentially.
    async fn request_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, ApiClientError> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = String::new();
        let mut delay: Option<u64> = None;

        for attempt in 0..attempts {
            if let Some(wait) = delay.take() {
                tracing::warn!(attempt, wait, url, "retrying request");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            let backoff = backoff_secs(attempt + 1);

            let response = match self
                .client
                .get(url)
                .bearer_auth(&self.config.token)
                .query(params)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_error = e.to_string();
                    delay = Some(backoff);
                    continue;
                }
                Err(e) => return Err(ApiClientError::RequestError(e)),
            };

            let status = response.status();
            match classify(status) {
                Disposition::Accept => {
                    return response.text().await.map_err(ApiClientError::RequestError);
                }
                Disposition::Throttled => {
                    delay = Some(retry_after(&response).unwrap_or(backoff));
                    last_error = status.to_string();
                }
                Disposition::Retry => {
                    let body = response.text().await.unwrap_or_default();
                    last_error = format!("{status}: {body}");
                    delay = Some(backoff);
                }
                Disposition::Reject => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiClientError::HttpError { status, body });
                }
            }
        }

        Err(ApiClientError::MaxRetriesExceeded {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const SOURCE_VARS: &[&str] = &[
        "SOURCE_API_BASE_URL",
        "SOURCE_API_TOKEN",
        "SOURCE_API_PAGE_SIZE",
        "SOURCE_API_MAX_RETRIES",
        "SOURCE_API_TIMEOUT_SECS",
    ];

    fn set_source_vars(overrides: &[(&str, &str)]) {
        for key in SOURCE_VARS {
            std::env::remove_var(key);
        }
        std::env::set_var("SOURCE_API_BASE_URL", "https://source.example.com/");
        std::env::set_var("SOURCE_API_TOKEN", "env-token");
        for (key, value) in overrides {
            std::env::set_var(key, value);
        }
    }

    fn test_config() -> ApiClientConfig {
        ApiClientConfig {
            base_url: "http://localhost".to_string(),
            token: "src-test-token".to_string(),
            page_size: 50,
            max_retries: 1,
            timeout_secs: 5,
        }
    }

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(test_config())
            .unwrap()
            .with_base_url(&server.uri())
    }

    #[test]
    fn from_env_applies_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        set_source_vars(&[]);

        let config = ApiClientConfig::from_env().unwrap();
        assert_eq!(config.base_url, "https://source.example.com");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn from_env_rejects_malformed_numbers() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        for (key, value) in [
            ("SOURCE_API_PAGE_SIZE", "lots"),
            ("SOURCE_API_PAGE_SIZE", "0"),
            ("SOURCE_API_MAX_RETRIES", "-1"),
            ("SOURCE_API_TIMEOUT_SECS", "30s"),
        ] {
            set_source_vars(&[(key, value)]);
            let err = ApiClientConfig::from_env().unwrap_err();
            assert!(matches!(err, TributaryError::Config(_)), "{key}={value}");
            assert!(err.to_string().contains(key), "{err}");
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(4), 16);
        assert_eq!(backoff_secs(5), 30);
        assert_eq!(backoff_secs(63), 30);
        assert_eq!(backoff_secs(64), 30);
        assert_eq!(backoff_secs(u32::MAX), 30);
    }

    #[test]
    fn classifies_status_codes() {
        assert_eq!(classify(StatusCode::OK), Disposition::Accept);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), Disposition::Throttled);
        assert_eq!(classify(StatusCode::BAD_GATEWAY), Disposition::Retry);
        assert_eq!(classify(StatusCode::UNAUTHORIZED), Disposition::Reject);
        assert_eq!(classify(StatusCode::NOT_FOUND), Disposition::Reject);
    }

    #[tokio::test]
    async fn sends_window_token_and_auth() {
        let server = MockServer::start().await;
        let since = "2026-03-01T11:30:00.000000Z";
        let until = "2026-03-01T12:00:00.000000Z";

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .and(header("authorization", "Bearer src-test-token"))
            .and(query_param("limit", "50"))
            .and(query_param("modified_since", since))
            .and(query_param("modified_until", until))
            .and(query_param("page_token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "o-1"}],
                "next_page_token": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = PageQuery {
            modified_since: Some(since.parse().unwrap()),
            modified_until: Some(until.parse().unwrap()),
            page_token: Some("p2"),
        };
        let page = client(&server).fetch_page("/v1/orders", &query).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn retries_on_503() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [],
                "next_page_token": "next"
            })))
            .mount(&server)
            .await;

        let page = client(&server)
            .fetch_page("v1/orders", &PageQuery::default())
            .await
            .unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn fails_fast_on_403() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_page("/v1/orders", &PageQuery::default())
            .await
            .unwrap_err();
        match err {
            ApiClientError::HttpError { status, body } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "forbidden");
            }
            other => panic!("expected HttpError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_page("/v1/orders", &PageQuery::default())
            .await
            .unwrap_err();
        match err {
            ApiClientError::MaxRetriesExceeded { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("boom"));
            }
            other => panic!("expected MaxRetriesExceeded, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_page("/v1/orders", &PageQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiClientError::Decode(_)));
    }

    #[tokio::test]
    async fn honours_retry_after_on_429() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(429).append_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": 1}]
            })))
            .mount(&server)
            .await;

        let page = client(&server)
            .fetch_page("/v1/orders", &PageQuery::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
