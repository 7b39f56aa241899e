//! GitHub search client.
//!
//! The engine only needs one thing from the search index: an integer
//! count for an opaque query string. [`SearchOracle`] is that seam;
//! [`GitHubSearch`] implements it against the REST search endpoint.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors returned by a search oracle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Rate limited by search API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Cannot connect to search API: {0}")]
    Connect(String),

    #[error("Search API error {status}")]
    Server { status: u16 },

    #[error("Query rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to parse search response: {0}")]
    Decode(String),
}

impl QueryError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::RateLimited { .. }
                | QueryError::Timeout
                | QueryError::Connect(_)
                | QueryError::Server { .. }
        )
    }
}

/// Remaining request budget as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetHint {
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// A successful count response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleReply {
    pub total: u64,
    /// The API flagged the figure as incomplete or capped.
    pub approximate: bool,
    pub budget: BudgetHint,
}

/// Anything that can turn a query string into a count.
#[async_trait]
pub trait SearchOracle: Send + Sync {
    async fn count(&self, query: &str) -> Result<OracleReply, QueryError>;
}

/// Search API response body; items are not needed.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    #[serde(default)]
    incomplete_results: bool,
}

/// Client for `GET /search/issues`.
pub struct GitHubSearch {
    client: Client,
    api_url: String,
    token: Option<String>,
    user_agent: String,
}

impl GitHubSearch {
    pub fn new(
        api_url: &str,
        token: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            user_agent: user_agent.to_string(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Predicates are passed through as-is; they are already in the
    /// `+`-joined form the search endpoint expects.
    fn search_url(&self, query: &str) -> String {
        format!("{}/search/issues?q={}&per_page=1", self.api_url, query)
    }
}

impl std::fmt::Debug for GitHubSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSearch")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl SearchOracle for GitHubSearch {
    async fn count(&self, query: &str) -> Result<OracleReply, QueryError> {
        let url = self.search_url(query);
        debug!(%url, "Search request");

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, &self.user_agent);
        if let Some(ref token) = self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout
            } else if e.is_connect() {
                QueryError::Connect(e.to_string())
            } else {
                QueryError::Connect(format!("Failed to send request: {}", e))
            }
        })?;

        let status = response.status();
        let budget = parse_budget(response.headers());

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, budget, retry_after, body));
        }

        let body: SearchResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Timeout
            } else {
                QueryError::Decode(e.to_string())
            }
        })?;

        Ok(OracleReply {
            total: body.total_count,
            approximate: body.incomplete_results,
            budget,
        })
    }
}

/// Map a non-success status to a query error.
///
/// GitHub answers primary rate limits with 403 and `x-ratelimit-remaining: 0`,
/// secondary limits with 403/429 and either `retry-after` or only a
/// "secondary rate limit" message in the body.
fn classify_status(
    status: StatusCode,
    budget: BudgetHint,
    retry_after: Option<Duration>,
    body: String,
) -> QueryError {
    let exhausted = budget.remaining == Some(0);
    let limit_message = body.to_ascii_lowercase().contains("rate limit");

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (exhausted || retry_after.is_some() || limit_message))
    {
        // The reset time only applies to the primary window.
        let retry_after = retry_after.or_else(|| {
            budget
                .reset_at
                .filter(|_| exhausted)
                .and_then(|reset| (reset - Utc::now()).to_std().ok())
        });
        return QueryError::RateLimited { retry_after };
    }

    if status.is_server_error() {
        return QueryError::Server {
            status: status.as_u16(),
        };
    }

    QueryError::Rejected {
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read `x-ratelimit-remaining` / `x-ratelimit-reset`.
pub fn parse_budget(headers: &HeaderMap) -> BudgetHint {
    BudgetHint {
        remaining: header_u64(headers, "x-ratelimit-remaining")
            .map(|v| v.min(u32::MAX as u64) as u32),
        reset_at: header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, RETRY_AFTER.as_str()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_budget_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("7"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        let hint = parse_budget(&headers);
        assert_eq!(hint.remaining, Some(7));
        assert_eq!(hint.reset_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_budget_missing_headers() {
        let hint = parse_budget(&HeaderMap::new());
        assert_eq!(hint, BudgetHint::default());
    }

    #[test]
    fn test_classify_rate_limits() {
        let exhausted = BudgetHint {
            remaining: Some(0),
            reset_at: None,
        };
        let err = classify_status(StatusCode::FORBIDDEN, exhausted, None, String::new());
        assert!(matches!(err, QueryError::RateLimited { .. }));

        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            BudgetHint::default(),
            Some(Duration::from_secs(30)),
            String::new(),
        );
        assert_eq!(
            err,
            QueryError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_terminal_and_server_errors() {
        let err = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            BudgetHint::default(),
            None,
            "Validation Failed".to_string(),
        );
        assert!(matches!(err, QueryError::Rejected { status: 422, .. }));
        assert!(!err.is_transient());

        let plain_forbidden = classify_status(
            StatusCode::FORBIDDEN,
            BudgetHint {
                remaining: Some(5),
                reset_at: None,
            },
            None,
            r#"{"message":"Resource not accessible by integration"}"#.to_string(),
        );
        assert!(matches!(
            plain_forbidden,
            QueryError::Rejected { status: 403, .. }
        ));
        assert!(!plain_forbidden.is_transient());

        let err = classify_status(
            StatusCode::BAD_GATEWAY,
            BudgetHint::default(),
            None,
            String::new(),
        );
        assert_eq!(err, QueryError::Server { status: 502 });
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_secondary_rate_limit_without_headers() {
        let reset = Utc::now() + chrono::Duration::seconds(3000);
        let err = classify_status(
            StatusCode::FORBIDDEN,
            BudgetHint {
                remaining: Some(25),
                reset_at: Some(reset),
            },
            None,
            r#"{"message":"You have exceeded a secondary rate limit. Please wait a few minutes before you try again."}"#
                .to_string(),
        );
        // Budget is left; backoff decides the wait, not the primary reset.
        assert_eq!(err, QueryError::RateLimited { retry_after: None });
        assert!(err.is_transient());
    }

    #[test]
    fn test_search_url_keeps_predicate_verbatim() {
        let client = GitHubSearch::new(
            "https://api.github.com/",
            Some(String::new()),
            "PR-Watcher",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!client.is_authenticated());
        assert_eq!(
            client.search_url("is:pr+head:codex/"),
            "https://api.github.com/search/issues?q=is:pr+head:codex/&per_page=1"
        );
    }

    #[test]
    fn test_response_decoding() {
        let body: SearchResponse =
            serde_json::from_str(r#"{"total_count": 1234, "incomplete_results": true, "items": []}"#)
                .unwrap();
        assert_eq!(body.total_count, 1234);
        assert!(body.incomplete_results);
    }
}
