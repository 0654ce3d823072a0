//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which identifies the repository under analysis, the
//! GitHub credential, and the team roster mapping.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Owner of the repository to analyze (e.g., "rust-lang").
    pub repo_owner: String,

    /// Name of the repository to analyze (e.g., "cargo").
    pub repo_name: String,

    /// Optional GitHub Personal Access Token for higher rate limits.
    pub github_token: Option<String>,

    /// Team rosters: team name to an ordered list of GitHub logins.
    /// Expected format: a JSON object, e.g. `{"platform":["alice","bob"]}`.
    #[serde(deserialize_with = "deserialize_teams")]
    pub teams: BTreeMap<String, Vec<String>>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Looks up the member roster for a team, preserving the configured order.
    pub fn roster(&self, team: &str) -> Option<&[String]> {
        self.teams.get(team).map(Vec::as_slice)
    }
}

fn deserialize_teams<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    serde_json::from_str(&s).map_err(serde::de::Error::custom)
}
