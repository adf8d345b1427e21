//! Serde models of the scheduler's JSON. Fields this client does not know
//! about are kept in `extra` so they survive a read-modify-write.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Opaque, non-empty job identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, ApiError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ApiError::InvalidJobId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id encoded as a single URL path segment.
    pub(crate) fn path_segment(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl FromStr for JobId {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Run counters the scheduler keeps per job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub number_of_finished_runs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_run: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Body of `GET job/`: every job keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub jobs: BTreeMap<String, Job>,
}

/// Service-wide counters, as found under the `Stats` key of `GET stats/`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stats {
    #[serde(default)]
    pub jobs: u64,
    #[serde(default)]
    pub active_jobs: u64,
    #[serde(default)]
    pub disabled_jobs: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobEnvelope {
    #[serde(default)]
    pub job: Option<Job>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedEnvelope {
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatsEnvelope {
    #[serde(rename = "Stats", default)]
    pub stats: Option<Stats>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn job_id_rejects_blank_ids() {
        assert!(matches!(JobId::new(""), Err(ApiError::InvalidJobId)));
        assert!(matches!("  ".parse::<JobId>(), Err(ApiError::InvalidJobId)));
        assert_eq!(JobId::new("42").unwrap().as_str(), "42");
    }

    #[test]
    fn job_id_is_encoded_as_one_segment() {
        let id = JobId::new("nightly/backup job").unwrap();
        assert_eq!(id.path_segment(), "nightly%2Fbackup%20job");
    }

    #[test]
    fn unknown_job_fields_are_preserved() {
        let body = json!({
            "id": "42",
            "name": "backup",
            "command": "bash backup.sh",
            "schedule": "R/2017-06-04T19:25:16Z/PT10S",
            "epsilon": "PT5S",
            "metadata": { "success_count": 3, "last_success": "2017-06-04T19:25:26Z" },
        });

        let job: Job = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(job.id, Some(JobId::new("42").unwrap()));
        assert_eq!(job.extra.get("epsilon"), Some(&json!("PT5S")));
        assert_eq!(job.metadata.as_ref().map(|m| m.success_count), Some(3));

        let reencoded = serde_json::to_value(&job).unwrap();
        assert_eq!(reencoded["epsilon"], body["epsilon"]);
        assert_eq!(reencoded["schedule"], body["schedule"]);
    }

    #[test]
    fn stats_use_pascal_case_keys() {
        let stats: Stats = serde_json::from_value(json!({
            "ActiveJobs": 2,
            "DisabledJobs": 1,
            "Jobs": 3,
            "ErrorCount": 0,
            "SuccessCount": 7,
            "NextRunAt": "2017-06-04T19:25:16Z",
        }))
        .unwrap();

        assert_eq!(stats.active_jobs, 2);
        assert_eq!(stats.jobs, 3);
        assert_eq!(stats.next_run_at.as_deref(), Some("2017-06-04T19:25:16Z"));
        assert!(stats.extra.is_empty());
    }
}
