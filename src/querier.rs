//! Service layer for querying and caching pull request metrics.
//!
//! This module implements `MetricsQuerier`, the main entry point for
//! retrieving team velocity data. It handles:
//! 1. Routing every upstream read through the process-lifetime request cache.
//! 2. Finding a user's merged pull requests via paginated search.
//! 3. Deriving per-PR metrics and aggregating them into a team report.
//!
//! All fetching within one query is sequential: member by member, pull
//! request by pull request. That keeps at most one in-flight request per
//! cache key without any per-key coordination.

use crate::cache::RequestCache;
use crate::config::AppConfig;
use crate::github::{FetchError, GitHubClient, SearchItem};
use crate::metrics::{self, PullRequestMetrics, PullRequestReport, PullRequestSummary, TeamReport};
use chrono::NaiveDate;
use std::future::Future;

/// Cache key for one merged-PR search.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SearchKey {
    username: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct MetricsQuerier {
    client: GitHubClient,
    metrics_cache: RequestCache<u64, PullRequestMetrics>,
    search_cache: RequestCache<SearchKey, Vec<PullRequestSummary>>,
}

impl MetricsQuerier {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = GitHubClient::new(
            &config.repo_owner,
            &config.repo_name,
            config.github_token.clone(),
        )?;

        Ok(Self {
            client,
            metrics_cache: RequestCache::new(),
            search_cache: RequestCache::new(),
        })
    }

    /// Retrieves derived metrics for one pull request (read-through).
    pub async fn get_pull_request_metrics(
        &self,
        number: u64,
    ) -> anyhow::Result<PullRequestMetrics> {
        self.metrics_cache
            .get_or_fetch(number, || self.fetch_pull_request_metrics(number))
            .await
    }

    /// The cached unit of work: both upstream reads plus derivation, so a
    /// rate limit on either read retries the pair.
    async fn fetch_pull_request_metrics(
        &self,
        number: u64,
    ) -> Result<PullRequestMetrics, FetchError> {
        let pr = self.client.fetch_pull_request(number).await?;
        let reviews = self.client.fetch_reviews(number).await?;
        Ok(metrics::pull_request_metrics(&pr, &reviews))
    }

    /// Retrieves all merged pull requests authored by `username`, optionally
    /// constrained to a merge-date range (read-through).
    pub async fn get_merged_pull_requests(
        &self,
        username: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<PullRequestSummary>> {
        let key = SearchKey {
            username: username.to_string(),
            start_date,
            end_date,
        };
        self.search_cache
            .get_or_fetch(key, || {
                self.fetch_merged_pull_requests(username, start_date, end_date)
            })
            .await
    }

    async fn fetch_merged_pull_requests(
        &self,
        username: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PullRequestSummary>, FetchError> {
        let items = collect_search_pages(|page| {
            self.client
                .search_merged_pull_requests(username, start_date, end_date, page)
        })
        .await?;

        Ok(items.into_iter().map(into_summary).collect())
    }

    /// Computes the full velocity report for a team.
    ///
    /// Any upstream failure aborts the whole query; no partial report is
    /// ever returned.
    pub async fn get_team_stats(
        &self,
        team_name: &str,
        team_members: &[String],
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> anyhow::Result<TeamReport> {
        let mut pull_requests = Vec::new();

        for member in team_members {
            let merged = self
                .get_merged_pull_requests(member, start_date, end_date)
                .await?;
            tracing::debug!(member = %member, count = merged.len(), "Fetched merged pull requests");

            for summary in merged {
                let metrics = self.get_pull_request_metrics(summary.number).await?;
                pull_requests.push(PullRequestReport { summary, metrics });
            }
        }

        Ok(metrics::build_team_report(
            team_name,
            team_members,
            pull_requests,
        ))
    }
}

/// Accumulates search pages starting at page 1 until one comes back empty.
/// Any page error aborts the accumulation.
async fn collect_search_pages<F, Fut>(fetch_page: F) -> Result<Vec<SearchItem>, FetchError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Vec<SearchItem>, FetchError>>,
{
    let mut all = Vec::new();
    let mut page = 1;

    loop {
        let items = fetch_page(page).await?;
        if items.is_empty() {
            break;
        }
        all.extend(items);
        page += 1;
    }

    Ok(all)
}

fn into_summary(item: SearchItem) -> PullRequestSummary {
    PullRequestSummary {
        number: item.number,
        title: item.title,
        url: item.html_url,
        merged_at: item.pull_request.and_then(|pr| pr.merged_at),
    }
}
