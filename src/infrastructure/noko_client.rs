use crate::domain::models::{CreateEntryRequest, RemoteEntry, UpdateEntryRequest};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::entry_mapper::{
    decode_entries, decode_entry, NokoEntryResponse, NokoProject, NokoTag, NokoUserResponse,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use url::Url;

const TOKEN_HEADER: &str = "X-NokoToken";
const TAGS_PAGE_SIZE: u32 = 1000;
const ENTRIES_PAGE_SIZE: u32 = 1000;
const PROJECTS_PAGE_SIZE: usize = 10;
const MAX_REDIRECTS: usize = 10;

#[async_trait]
pub trait NokoClient: Send + Sync {
    fn token(&self) -> &str;

    async fn current_user(&self) -> Result<NokoUserResponse, InfraError>;

    /// Entries of the authenticated user, both bounds inclusive.
    async fn list_entries(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RemoteEntry>, InfraError>;

    async fn create_entry(&self, body: &CreateEntryRequest) -> Result<RemoteEntry, InfraError>;

    async fn update_entry(&self, id: i64, body: &UpdateEntryRequest) -> Result<(), InfraError>;

    async fn delete_entry(&self, id: i64) -> Result<(), InfraError>;

    async fn list_tags(&self) -> Result<Vec<NokoTag>, InfraError>;

    async fn list_enabled_projects(&self) -> Result<Vec<NokoProject>, InfraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NokoClientSettings {
    pub base_url: String,
    pub user_agent: String,
    pub minimum_request_interval: Duration,
}

impl NokoClientSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.noko_api_base_url.clone(),
            user_agent: config.user_agent.clone(),
            minimum_request_interval: Duration::from_millis(config.minimum_request_interval_ms),
        }
    }
}

impl Default for NokoClientSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Keeps at least `minimum_interval` between the end of one request and the
/// start of the next. The lock is held for the whole request so concurrent
/// callers queue up behind each other.
#[derive(Debug)]
pub struct RateLimiter {
    minimum_interval: Duration,
    last_request_end: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(minimum_interval: Duration) -> Self {
        Self {
            minimum_interval,
            last_request_end: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn run<F, T>(&self, request: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last_request_end = self.last_request_end.lock().await;
        if let Some(ended_at) = *last_request_end {
            let elapsed = ended_at.elapsed();
            if elapsed < self.minimum_interval {
                sleep(self.minimum_interval - elapsed).await;
            }
        }
        let result = request.await;
        *last_request_end = Some(Instant::now());
        result
    }
}

#[derive(Debug)]
pub struct ReqwestNokoClient {
    client: Client,
    base_url: Url,
    user_agent: String,
    token: String,
    rate_limiter: RateLimiter,
}

impl ReqwestNokoClient {
    pub fn new(token: &str, settings: &NokoClientSettings) -> Result<Self, InfraError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InfraError::Credential(
                "noko api token must not be empty".to_string(),
            ));
        }
        let base_url = Url::parse(&settings.base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid noko api base url: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "noko api base url cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|error| InfraError::Network(format!("failed building http client: {error}")))?;

        Ok(Self {
            client,
            base_url,
            user_agent: settings.user_agent.clone(),
            token: token.to_string(),
            rate_limiter: RateLimiter::new(settings.minimum_request_interval),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        build_endpoint(&self.base_url, segments)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(TOKEN_HEADER, &self.token)
    }

    /// Sends one rate-limited request and returns the response body of a
    /// successful call.
    async fn execute(&self, builder: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let request = self.authorized(builder);
        let (status, body) = self
            .rate_limiter
            .run(async {
                let response = request.send().await.map_err(|error| {
                    InfraError::Network(format!("network error while {action}: {error}"))
                })?;
                let status = response.status();
                let body = response.text().await.map_err(|error| {
                    InfraError::Network(format!("failed reading response while {action}: {error}"))
                })?;
                Ok::<_, InfraError>((status, body))
            })
            .await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), action, "noko request failed");
            return Err(noko_http_error(status, &body));
        }
        Ok(body)
    }
}

fn build_endpoint(base_url: &Url, segments: &[&str]) -> Result<Url, InfraError> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            InfraError::InvalidConfig("noko api base url cannot be a base".to_string())
        })?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

fn noko_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
    let message = if body.trim().is_empty() {
        "unexpected response".to_string()
    } else {
        format!("unexpected response; body={body}")
    };
    InfraError::Noko {
        status: status.as_u16(),
        message,
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, InfraError> {
    serde_json::from_str(body).map_err(|error| InfraError::Noko {
        status: 200,
        message: format!("invalid {what} payload: {error}; body={body}"),
    })
}

#[async_trait]
impl NokoClient for ReqwestNokoClient {
    fn token(&self) -> &str {
        &self.token
    }

    async fn current_user(&self) -> Result<NokoUserResponse, InfraError> {
        let endpoint = self.endpoint(&["current_user", ""])?;
        let body = self
            .execute(self.client.get(endpoint), "fetching current user")
            .await?;
        parse_body(&body, "current user")
    }

    async fn list_entries(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RemoteEntry>, InfraError> {
        let endpoint = self.endpoint(&["current_user", "entries"])?;
        let request = self.client.get(endpoint).query(&[
            ("from", from.format("%Y-%m-%d").to_string()),
            ("to", to.format("%Y-%m-%d").to_string()),
            ("per_page", ENTRIES_PAGE_SIZE.to_string()),
        ]);
        let body = self.execute(request, "listing entries").await?;
        let entries: Vec<NokoEntryResponse> = parse_body(&body, "entries list")?;
        tracing::debug!(count = entries.len(), %from, %to, "fetched noko entries");
        decode_entries(&entries)
    }

    async fn create_entry(&self, body: &CreateEntryRequest) -> Result<RemoteEntry, InfraError> {
        let endpoint = self.endpoint(&["entries"])?;
        let response = self
            .execute(self.client.post(endpoint).json(body), "creating entry")
            .await?;
        let created: NokoEntryResponse = parse_body(&response, "entry create")?;
        decode_entry(&created)
    }

    async fn update_entry(&self, id: i64, body: &UpdateEntryRequest) -> Result<(), InfraError> {
        let id = id.to_string();
        let endpoint = self.endpoint(&["entries", &id])?;
        self.execute(self.client.put(endpoint).json(body), "updating entry")
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, id: i64) -> Result<(), InfraError> {
        let id = id.to_string();
        let endpoint = self.endpoint(&["entries", &id])?;
        self.execute(self.client.delete(endpoint), "deleting entry")
            .await?;
        Ok(())
    }

    async fn list_tags(&self) -> Result<Vec<NokoTag>, InfraError> {
        let endpoint = self.endpoint(&["tags", ""])?;
        let request = self
            .client
            .get(endpoint)
            .query(&[("per_page", TAGS_PAGE_SIZE)]);
        let body = self.execute(request, "listing tags").await?;
        parse_body(&body, "tags list")
    }

    async fn list_enabled_projects(&self) -> Result<Vec<NokoProject>, InfraError> {
        let endpoint = self.endpoint(&["projects", ""])?;
        let mut projects = Vec::new();
        let mut page: usize = 1;
        loop {
            let request = self.client.get(endpoint.clone()).query(&[
                ("enabled", "true".to_string()),
                ("per_page", PROJECTS_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ]);
            let body = self.execute(request, "listing projects").await?;
            let batch: Vec<NokoProject> = parse_body(&body, "projects list")?;
            let batch_len = batch.len();
            projects.extend(batch);
            if batch_len < PROJECTS_PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(projects)
    }
}

type ClientFactory<C> = Box<dyn Fn(&str) -> Result<C, InfraError> + Send + Sync>;

/// Owns the process-wide client so rate-limit state survives between calls.
/// The client is built on first use and rebuilt only when the token changes.
pub struct NokoClientProvider<C: NokoClient> {
    factory: ClientFactory<C>,
    current: Mutex<Option<Arc<C>>>,
}

impl NokoClientProvider<ReqwestNokoClient> {
    pub fn reqwest(settings: NokoClientSettings) -> Self {
        Self::new(move |token| ReqwestNokoClient::new(token, &settings))
    }
}

impl<C: NokoClient> NokoClientProvider<C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<C, InfraError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            current: Mutex::new(None),
        }
    }

    pub fn client_for(&self, token: &str) -> Result<Arc<C>, InfraError> {
        let token = token.trim();
        let mut guard = self
            .current
            .lock()
            .map_err(|error| InfraError::Network(format!("client provider lock poisoned: {error}")))?;
        if let Some(existing) = guard.as_ref().filter(|client| client.token() == token) {
            return Ok(Arc::clone(existing));
        }

        tracing::debug!("creating noko client for new token");
        let client = Arc::new((self.factory)(token)?);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    pub fn clear(&self) -> Result<(), InfraError> {
        let mut guard = self
            .current
            .lock()
            .map_err(|error| InfraError::Network(format!("client provider lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TokenOnlyClient {
        token: String,
    }

    #[async_trait]
    impl NokoClient for TokenOnlyClient {
        fn token(&self) -> &str {
            &self.token
        }

        async fn current_user(&self) -> Result<NokoUserResponse, InfraError> {
            Err(InfraError::Network("not implemented in fake".to_string()))
        }

        async fn list_entries(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<RemoteEntry>, InfraError> {
            Ok(Vec::new())
        }

        async fn create_entry(
            &self,
            _body: &CreateEntryRequest,
        ) -> Result<RemoteEntry, InfraError> {
            Err(InfraError::Network("not implemented in fake".to_string()))
        }

        async fn update_entry(
            &self,
            _id: i64,
            _body: &UpdateEntryRequest,
        ) -> Result<(), InfraError> {
            Ok(())
        }

        async fn delete_entry(&self, _id: i64) -> Result<(), InfraError> {
            Ok(())
        }

        async fn list_tags(&self) -> Result<Vec<NokoTag>, InfraError> {
            Ok(Vec::new())
        }

        async fn list_enabled_projects(&self) -> Result<Vec<NokoProject>, InfraError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn endpoints_are_joined_below_the_base_path() {
        let base = Url::parse("https://api.nokotime.com/v2/").expect("valid url");

        let entries = build_endpoint(&base, &["current_user", "entries"]).expect("endpoint");
        assert_eq!(
            entries.as_str(),
            "https://api.nokotime.com/v2/current_user/entries"
        );

        let tags = build_endpoint(&base, &["tags", ""]).expect("endpoint");
        assert_eq!(tags.as_str(), "https://api.nokotime.com/v2/tags/");

        let without_slash = Url::parse("https://api.nokotime.com/v2").expect("valid url");
        let entry = build_endpoint(&without_slash, &["entries", "42"]).expect("endpoint");
        assert_eq!(entry.as_str(), "https://api.nokotime.com/v2/entries/42");
    }

    #[test]
    fn client_requires_token_and_valid_base_url() {
        let settings = NokoClientSettings::default();
        assert!(matches!(
            ReqwestNokoClient::new("  ", &settings),
            Err(InfraError::Credential(_))
        ));

        let invalid = NokoClientSettings {
            base_url: "not a url".to_string(),
            ..NokoClientSettings::default()
        };
        assert!(matches!(
            ReqwestNokoClient::new("token", &invalid),
            Err(InfraError::InvalidConfig(_))
        ));

        let client = ReqwestNokoClient::new(" token ", &settings).expect("client");
        assert_eq!(client.token(), "token");
    }

    #[test]
    fn default_settings_follow_app_config() {
        let settings = NokoClientSettings::default();
        assert_eq!(settings.base_url, "https://api.nokotime.com/v2/");
        assert_eq!(settings.user_agent, "keepi/1.0");
        assert_eq!(settings.minimum_request_interval, Duration::from_millis(500));
    }

    #[test]
    fn http_errors_keep_status_and_body() {
        let error = noko_http_error(reqwest::StatusCode::UNAUTHORIZED, "{\"message\":\"bad token\"}");
        match error {
            InfraError::Noko { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("bad token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limiter_spaces_requests_from_end_to_start() {
        let limiter = RateLimiter::new(Duration::from_millis(60));
        let started = Instant::now();

        limiter.run(async { sleep(Duration::from_millis(20)).await }).await;
        let second_started = limiter.run(async { Instant::now() }).await;

        assert!(second_started.duration_since(started) >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn rate_limiter_does_not_delay_first_request() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let started = Instant::now();
        limiter.run(async {}).await;
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn rate_limiter_serializes_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(30)));
        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.run(async {}).await }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn provider_reuses_client_until_token_changes() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let provider = NokoClientProvider::new(move |token: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TokenOnlyClient {
                token: token.to_string(),
            })
        });

        let first = provider.client_for("token-a").expect("client");
        let again = provider.client_for(" token-a ").expect("client");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let other = provider.client_for("token-b").expect("client");
        assert_eq!(other.token(), "token-b");
        assert_eq!(built.load(Ordering::SeqCst), 2);

        provider.clear().expect("clear");
        let rebuilt = provider.client_for("token-b").expect("client");
        assert!(!Arc::ptr_eq(&other, &rebuilt));
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }
}
