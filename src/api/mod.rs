//! HTTP implementation of [`MatchWriter`] against a PostgREST style backend (`/rest/v1/...`). The
//! client accepts any base URL so other backends speaking the same dialect work as well.

mod error;

pub use error::ApiClientError;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Request, StatusCode, Url};
use serde::Serialize;

use crate::queue::{MatchLogEntry, ScoreUpdate};
use crate::remote::{MatchWriter, RemoteWriteError};

const MATCH_LOGS_PATH: &str = "rest/v1/match_logs";

const MATCHES_PATH: &str = "rest/v1/matches";

#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    client: Client,
}

impl ApiClient {
    pub(crate) fn append_request(&self, entry: &MatchLogEntry) -> Result<Request, ApiClientError> {
        let url = self.base_url.join(MATCH_LOGS_PATH)?;

        let request = self
            .client
            .post(url)
            .header("Prefer", "return=minimal")
            .json(entry)
            .build()?;

        Ok(request)
    }

    async fn execute(&self, request: Request) -> Result<(), RemoteWriteError> {
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| RemoteWriteError::transient(format!("{method} {path} failed: {err}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::trace!(%method, path = %path, %status, "remote write accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_rejection(status, &body))
    }

    /// Builds a client for the backend at `base_url`. The API key is sent both as the `apikey`
    /// header and as the bearer token.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ApiClientError> {
        let mut base_url = Url::parse(base_url)?;

        // Url::join drops the last path segment unless it ends in a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = default_reqwest_client(api_key)?;

        Ok(Self { base_url, client })
    }

    pub(crate) fn score_request(&self, update: &ScoreUpdate) -> Result<Request, ApiClientError> {
        let mut url = self.base_url.join(MATCHES_PATH)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{}", update.match_id));

        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=minimal")
            .json(&ScorePatch {
                score_a: update.score_a,
                score_b: update.score_b,
            })
            .build()?;

        Ok(request)
    }
}

#[async_trait(?Send)]
impl MatchWriter for ApiClient {
    async fn append_match_log(&self, entry: &MatchLogEntry) -> Result<(), RemoteWriteError> {
        let request = self
            .append_request(entry)
            .map_err(|err| RemoteWriteError::permanent(err.to_string()))?;

        self.execute(request).await
    }

    async fn set_match_score(&self, update: &ScoreUpdate) -> Result<(), RemoteWriteError> {
        let request = self
            .score_request(update)
            .map_err(|err| RemoteWriteError::permanent(err.to_string()))?;

        self.execute(request).await
    }
}

#[derive(Serialize)]
struct ScorePatch {
    score_a: u32,
    score_b: u32,
}

/// Client errors mean the backend won't ever accept this write, with the exception of timeouts and
/// rate limiting. Everything else is worth retrying.
fn classify_rejection(status: StatusCode, body: &str) -> RemoteWriteError {
    let message = format!("backend responded with {status}: {body}");

    let retryable = matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    );

    if status.is_client_error() && !retryable {
        RemoteWriteError::permanent(message)
    } else {
        RemoteWriteError::transient(message)
    }
}

fn default_reqwest_client(api_key: &str) -> Result<Client, ApiClientError> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let user_agent = HeaderValue::from_str(&crate::version::user_agent())
        .map_err(|_| ApiClientError::InvalidHeader("user agent"))?;
    default_headers.insert(USER_AGENT, user_agent);

    let mut key = HeaderValue::from_str(api_key).map_err(|_| ApiClientError::InvalidHeader("apikey"))?;
    key.set_sensitive(true);
    default_headers.insert("apikey", key);

    let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ApiClientError::InvalidHeader("authorization"))?;
    bearer.set_sensitive(true);
    default_headers.insert(AUTHORIZATION, bearer);

    let client = Client::builder().default_headers(default_headers).build()?;

    Ok(client)
}
