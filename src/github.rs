//! GitHub API access.
//!
//! `GitHubClient` wraps an authenticated [`Octocrab`] instance bound to a single
//! repository and exposes the three reads this service needs: pull request
//! detail, the review list, and merged-PR search. Responses are deserialized
//! into crate-local records carrying exactly the fields the metrics layer
//! consumes, so the rest of the crate never touches octocrab models.

use chrono::{DateTime, NaiveDate, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

/// Page size for search and review listings.
const PAGE_SIZE: u8 = 100;

/// Wait this long before retrying when the reset time cannot be determined.
const FALLBACK_RESET_SECS: i64 = 60;

/// Classified upstream failure, as seen by the caching retry layer.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The API quota is exhausted; retry after the Unix epoch `reset`.
    #[error("rate limited until {reset}")]
    RateLimited { reset: i64 },
    /// Any other upstream failure. Propagated to the caller, never retried.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub login: String,
}

/// Pull request detail as returned by `GET /repos/{owner}/{repo}/pulls/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRecord {
    pub user: Option<UserRecord>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub review_comments: u64,
}

/// One entry of a pull request's review list, in upstream order.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRecord {
    pub user: Option<UserRecord>,
    pub state: String,
    /// Absent for reviews that were never submitted (state `PENDING`).
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    items: Vec<SearchItem>,
}

/// One item of a `/search/issues` result page.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub pull_request: Option<PullRequestRef>,
}

/// The pull-request sub-object attached to search items that are PRs.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SearchParams<'a> {
    q: &'a str,
    sort: &'a str,
    order: &'a str,
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct ListParams {
    per_page: u8,
}

/// Client for the repository under analysis.
#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(owner: &str, repo: &str, token: Option<String>) -> anyhow::Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }

        Ok(Self {
            octocrab: builder.build()?,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub async fn fetch_pull_request(&self, number: u64) -> Result<PullRequestRecord, FetchError> {
        let route = format!("/repos/{}/{}/pulls/{number}", self.owner, self.repo);
        match self
            .octocrab
            .get::<PullRequestRecord, _, _>(&route, None::<&()>)
            .await
        {
            Ok(pr) => Ok(pr),
            Err(e) => Err(self.classify(e).await),
        }
    }

    /// Fetches the full review list for a pull request, in upstream order.
    pub async fn fetch_reviews(&self, number: u64) -> Result<Vec<ReviewRecord>, FetchError> {
        let route = format!("/repos/{}/{}/pulls/{number}/reviews", self.owner, self.repo);
        match self
            .octocrab
            .get::<Vec<ReviewRecord>, _, _>(&route, Some(&ListParams { per_page: PAGE_SIZE }))
            .await
        {
            Ok(reviews) => Ok(reviews),
            Err(e) => Err(self.classify(e).await),
        }
    }

    /// Fetches one page of merged pull requests authored by `username`,
    /// most recently updated first. An empty page means the results are
    /// exhausted.
    pub async fn search_merged_pull_requests(
        &self,
        username: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        page: u32,
    ) -> Result<Vec<SearchItem>, FetchError> {
        let query = build_search_query(&self.owner, &self.repo, username, start_date, end_date);
        let params = SearchParams {
            q: &query,
            sort: "updated",
            order: "desc",
            per_page: PAGE_SIZE,
            page,
        };

        match self
            .octocrab
            .get::<SearchResults, _, _>("/search/issues", Some(&params))
            .await
        {
            Ok(results) => Ok(results.items),
            Err(e) => Err(self.classify(e).await),
        }
    }

    async fn classify(&self, err: octocrab::Error) -> FetchError {
        if is_rate_limit(&err) {
            let reset = self.rate_limit_reset().await;
            return FetchError::RateLimited { reset };
        }
        FetchError::Upstream(err.into())
    }

    /// Resolves the quota reset time after a rate-limited response.
    ///
    /// Octocrab does not expose response headers on errors, so the reset epoch
    /// comes from the dedicated endpoint, which GitHub exempts from rate
    /// limiting.
    async fn rate_limit_reset(&self) -> i64 {
        #[derive(Deserialize)]
        struct RateLimitRecord {
            rate: RateRecord,
        }
        #[derive(Deserialize)]
        struct RateRecord {
            reset: i64,
        }

        match self
            .octocrab
            .get::<RateLimitRecord, _, _>("/rate_limit", None::<&()>)
            .await
        {
            Ok(limits) => limits.rate.reset,
            Err(e) => {
                tracing::warn!("Failed to read rate limit reset time: {e}");
                Utc::now().timestamp() + FALLBACK_RESET_SECS
            }
        }
    }
}

// Octocrab surfaces GitHub errors without the HTTP status or response headers,
// so classification matches on the error message.
fn is_rate_limit(err: &octocrab::Error) -> bool {
    if let octocrab::Error::GitHub { source, .. } = err {
        source.message.to_lowercase().contains("rate limit")
    } else {
        false
    }
}

fn build_search_query(
    owner: &str,
    repo: &str,
    username: &str,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> String {
    // The merge-date clause applies only when both ends of the range are
    // present; otherwise the search is unconstrained by date.
    let date_range = match (start_date, end_date) {
        (Some(start), Some(end)) => format!(" merged:{start}..{end}"),
        _ => String::new(),
    };
    format!("repo:{owner}/{repo} is:pr is:merged author:{username}{date_range}")
}
