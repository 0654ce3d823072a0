//! Pull request metric derivation and team aggregation.
//!
//! Everything here is pure: raw records in, derived numbers out. Network
//! access and caching live in `querier`.

use crate::github::{PullRequestRecord, ReviewRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

const APPROVED: &str = "APPROVED";

/// Size of a pull request's change set.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ChangeSize {
    pub additions: u64,
    pub deletions: u64,
    /// `additions + deletions`.
    pub total: u64,
    pub changed_files: u64,
}

/// Timing and size metrics derived from one merged pull request.
///
/// Durations are in seconds. Every "no matching review" case degrades to 0
/// rather than an error, so aggregation arithmetic stays well-defined; a PR
/// with zero reviews is indistinguishable from one reviewed instantly.
#[derive(Debug, Serialize, Clone)]
pub struct PullRequestMetrics {
    /// Time from the first approving review to merge; 0 when nothing was approved.
    pub approval_to_merge_time: f64,
    /// Time from creation to merge.
    pub cycle_time: f64,
    /// Time from creation to the first review by a non-author; 0 when never reviewed.
    pub pickup_time: f64,
    /// Time from the first non-author review to merge; 0 when never reviewed.
    pub review_time: f64,
    /// Conversational comments on the pull request.
    pub comment_count: u64,
    /// Review comments on the pull request.
    pub review_count: u64,
    pub size: ChangeSize,
}

/// Identity of a merged pull request, as produced by the search.
#[derive(Debug, Serialize, Clone)]
pub struct PullRequestSummary {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub merged_at: Option<DateTime<Utc>>,
}

/// A pull request and its metrics, flattened into one record for the report.
#[derive(Debug, Serialize, Clone)]
pub struct PullRequestReport {
    #[serde(flatten)]
    pub summary: PullRequestSummary,
    #[serde(flatten)]
    pub metrics: PullRequestMetrics,
}

/// Team-level summary statistics.
///
/// Averages are sums divided by `total_prs`. With no pull requests in range
/// they are NaN (serialized as `null`) rather than being guarded to zero;
/// "no data" and "instant turnaround" are different answers.
#[derive(Debug, Serialize, Clone)]
pub struct TeamMetrics {
    pub total_prs: usize,
    pub avg_cycle_time: f64,
    pub avg_pickup_time: f64,
    pub avg_review_time: f64,
    pub avg_approval_to_merge_time: f64,
    pub avg_size: f64,
    pub avg_files: f64,
}

/// The full response for one team query.
#[derive(Debug, Serialize, Clone)]
pub struct TeamReport {
    pub team_name: String,
    /// Roster in configured order.
    pub team_members: Vec<String>,
    /// All merged pull requests in range, ascending by merge time.
    pub pull_requests: Vec<PullRequestReport>,
    pub metrics: TeamMetrics,
}

/// Derives all metrics for one pull request from its record and review list.
pub fn pull_request_metrics(
    pr: &PullRequestRecord,
    reviews: &[ReviewRecord],
) -> PullRequestMetrics {
    PullRequestMetrics {
        approval_to_merge_time: approval_to_merge_time(pr, reviews),
        cycle_time: cycle_time(pr),
        pickup_time: pickup_time(pr, reviews),
        review_time: review_time(pr, reviews),
        comment_count: pr.comments,
        review_count: pr.review_comments,
        size: change_size(pr),
    }
}

fn seconds_between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> f64 {
    match (from, to) {
        (Some(from), Some(to)) => (to - from).num_milliseconds() as f64 / 1000.0,
        _ => f64::NAN,
    }
}

fn cycle_time(pr: &PullRequestRecord) -> f64 {
    seconds_between(Some(pr.created_at), pr.merged_at)
}

/// The first review in the list submitted by someone other than the PR author.
///
/// "First" means upstream listing order, not submission time. A review with
/// no user on record counts as non-author.
fn first_non_author_review<'a>(
    pr: &PullRequestRecord,
    reviews: &'a [ReviewRecord],
) -> Option<&'a ReviewRecord> {
    let author = pr.user.as_ref().map(|u| u.login.as_str());
    reviews
        .iter()
        .find(|review| review.user.as_ref().map(|u| u.login.as_str()) != author)
}

fn pickup_time(pr: &PullRequestRecord, reviews: &[ReviewRecord]) -> f64 {
    match first_non_author_review(pr, reviews) {
        Some(review) => seconds_between(Some(pr.created_at), review.submitted_at),
        None => 0.0,
    }
}

fn review_time(pr: &PullRequestRecord, reviews: &[ReviewRecord]) -> f64 {
    match first_non_author_review(pr, reviews) {
        Some(review) => seconds_between(review.submitted_at, pr.merged_at),
        None => 0.0,
    }
}

fn approval_to_merge_time(pr: &PullRequestRecord, reviews: &[ReviewRecord]) -> f64 {
    // The author is not filtered out here; any approving review counts.
    match reviews.iter().find(|review| review.state == APPROVED) {
        Some(review) => seconds_between(review.submitted_at, pr.merged_at),
        None => 0.0,
    }
}

fn change_size(pr: &PullRequestRecord) -> ChangeSize {
    ChangeSize {
        additions: pr.additions,
        deletions: pr.deletions,
        total: pr.additions + pr.deletions,
        changed_files: pr.changed_files,
    }
}

/// Builds the team report from accumulated per-PR records.
pub fn build_team_report(
    team_name: &str,
    team_members: &[String],
    mut pull_requests: Vec<PullRequestReport>,
) -> TeamReport {
    let total_prs = pull_requests.len();

    let mut cycle = 0.0;
    let mut pickup = 0.0;
    let mut review = 0.0;
    let mut approval = 0.0;
    let mut size = 0.0;
    let mut files = 0.0;

    for pr in &pull_requests {
        cycle += pr.metrics.cycle_time;
        pickup += pr.metrics.pickup_time;
        review += pr.metrics.review_time;
        approval += pr.metrics.approval_to_merge_time;
        size += pr.metrics.size.total as f64;
        files += pr.metrics.size.changed_files as f64;
    }

    pull_requests.sort_by_key(|pr| pr.summary.merged_at);

    let denom = total_prs as f64;
    TeamReport {
        team_name: team_name.to_string(),
        team_members: team_members.to_vec(),
        pull_requests,
        metrics: TeamMetrics {
            total_prs,
            avg_cycle_time: cycle / denom,
            avg_pickup_time: pickup / denom,
            avg_review_time: review / denom,
            avg_approval_to_merge_time: approval / denom,
            avg_size: size / denom,
            avg_files: files / denom,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::UserRecord;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn pr(author: &str, created: DateTime<Utc>, merged: DateTime<Utc>) -> PullRequestRecord {
        PullRequestRecord {
            user: Some(UserRecord {
                login: author.to_string(),
            }),
            created_at: created,
            merged_at: Some(merged),
            additions: 0,
            deletions: 0,
            changed_files: 0,
            comments: 0,
            review_comments: 0,
        }
    }

    fn review(author: Option<&str>, state: &str, submitted: DateTime<Utc>) -> ReviewRecord {
        ReviewRecord {
            user: author.map(|login| UserRecord {
                login: login.to_string(),
            }),
            state: state.to_string(),
            submitted_at: Some(submitted),
        }
    }

    #[test]
    fn cycle_time_is_creation_to_merge() {
        let pr = pr("alice", ts(1, 0), ts(2, 0));
        let metrics = pull_request_metrics(&pr, &[]);
        assert_eq!(metrics.cycle_time, 86_400.0);
    }

    #[test]
    fn no_non_author_reviews_degrade_to_zero() {
        let pr = pr("alice", ts(1, 0), ts(2, 0));
        // Only the author has reviewed; pickup and review time stay zero.
        let reviews = vec![review(Some("alice"), "COMMENTED", ts(1, 6))];
        let metrics = pull_request_metrics(&pr, &reviews);
        assert_eq!(metrics.pickup_time, 0.0);
        assert_eq!(metrics.review_time, 0.0);
        assert_eq!(metrics.approval_to_merge_time, 0.0);
    }

    #[test]
    fn pickup_and_review_time_use_first_non_author_review() {
        let pr = pr("alice", ts(1, 0), ts(3, 0));
        let reviews = vec![
            review(Some("alice"), "COMMENTED", ts(1, 1)),
            review(Some("bob"), "COMMENTED", ts(1, 12)),
            review(Some("carol"), "APPROVED", ts(2, 0)),
        ];
        let metrics = pull_request_metrics(&pr, &reviews);
        // bob's review at day 1, 12:00: 12h after creation, 36h before merge.
        assert_eq!(metrics.pickup_time, 12.0 * 3600.0);
        assert_eq!(metrics.review_time, 36.0 * 3600.0);
    }

    #[test]
    fn first_review_selection_follows_list_order_not_time() {
        let pr = pr("alice", ts(1, 0), ts(3, 0));
        // The list puts the later review first; it still wins.
        let reviews = vec![
            review(Some("bob"), "COMMENTED", ts(2, 0)),
            review(Some("carol"), "COMMENTED", ts(1, 6)),
        ];
        let metrics = pull_request_metrics(&pr, &reviews);
        assert_eq!(metrics.pickup_time, 24.0 * 3600.0);
    }

    #[test]
    fn review_without_user_counts_as_non_author() {
        let pr = pr("alice", ts(1, 0), ts(2, 0));
        let reviews = vec![ReviewRecord {
            user: None,
            state: "COMMENTED".to_string(),
            submitted_at: Some(ts(1, 6)),
        }];
        let metrics = pull_request_metrics(&pr, &reviews);
        assert_eq!(metrics.pickup_time, 6.0 * 3600.0);
    }

    #[test]
    fn approval_to_merge_time_uses_first_approved_review() {
        let pr = pr("alice", ts(1, 0), ts(3, 0));
        let reviews = vec![
            review(Some("bob"), "CHANGES_REQUESTED", ts(1, 6)),
            review(Some("bob"), "APPROVED", ts(2, 0)),
        ];
        let metrics = pull_request_metrics(&pr, &reviews);
        assert_eq!(metrics.approval_to_merge_time, 24.0 * 3600.0);
    }

    #[test]
    fn approval_by_the_author_counts() {
        let pr = pr("alice", ts(1, 0), ts(2, 0));
        let reviews = vec![review(Some("alice"), "APPROVED", ts(1, 12))];
        let metrics = pull_request_metrics(&pr, &reviews);
        assert_eq!(metrics.approval_to_merge_time, 12.0 * 3600.0);
    }

    #[test]
    fn size_totals_additions_and_deletions() {
        let mut record = pr("alice", ts(1, 0), ts(2, 0));
        record.additions = 50;
        record.deletions = 10;
        record.changed_files = 3;
        record.comments = 4;
        record.review_comments = 2;

        let metrics = pull_request_metrics(&record, &[]);
        assert_eq!(
            metrics.size,
            ChangeSize {
                additions: 50,
                deletions: 10,
                total: 60,
                changed_files: 3,
            }
        );
        assert_eq!(metrics.comment_count, 4);
        assert_eq!(metrics.review_count, 2);
    }

    fn report_entry(number: u64, merged: DateTime<Utc>, cycle: f64) -> PullRequestReport {
        PullRequestReport {
            summary: PullRequestSummary {
                number,
                title: format!("PR {number}"),
                url: format!("https://github.com/acme/widgets/pull/{number}"),
                merged_at: Some(merged),
            },
            metrics: PullRequestMetrics {
                approval_to_merge_time: 0.0,
                cycle_time: cycle,
                pickup_time: 0.0,
                review_time: 0.0,
                comment_count: 0,
                review_count: 0,
                size: ChangeSize {
                    additions: 10,
                    deletions: 2,
                    total: 12,
                    changed_files: 3,
                },
            },
        }
    }

    #[test]
    fn team_report_sorts_by_merge_time_ascending() {
        let entries = vec![
            report_entry(2, ts(5, 0), 100.0),
            report_entry(1, ts(2, 0), 200.0),
        ];
        let report = build_team_report("platform", &["alice".to_string()], entries);

        let numbers: Vec<u64> = report
            .pull_requests
            .iter()
            .map(|pr| pr.summary.number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn team_report_averages_are_sums_over_count() {
        let entries = vec![
            report_entry(1, ts(2, 0), 100.0),
            report_entry(2, ts(5, 0), 300.0),
        ];
        let report = build_team_report("platform", &["alice".to_string()], entries);

        assert_eq!(report.metrics.total_prs, 2);
        assert_eq!(report.metrics.avg_cycle_time, 200.0);
        assert_eq!(report.metrics.avg_size, 12.0);
        assert_eq!(report.metrics.avg_files, 3.0);
    }

    #[test]
    fn team_report_with_no_prs_yields_nan_averages() {
        let report = build_team_report("platform", &["alice".to_string()], vec![]);

        assert_eq!(report.metrics.total_prs, 0);
        assert!(report.metrics.avg_cycle_time.is_nan());
        assert!(report.metrics.avg_pickup_time.is_nan());
        assert!(report.metrics.avg_review_time.is_nan());
        assert!(report.metrics.avg_approval_to_merge_time.is_nan());
        assert!(report.metrics.avg_size.is_nan());
        assert!(report.metrics.avg_files.is_nan());
        // The sentinel becomes null on the wire.
        let json = serde_json::to_value(&report.metrics).unwrap();
        assert_eq!(json["avg_cycle_time"], serde_json::Value::Null);
    }
}
