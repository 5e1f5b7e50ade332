//! # AutoLT tracker client
//!
//! Jira-flavoured issue tracker client: JQL search for pending load-test
//! tasks, plus the status/planned-start write-back the allocator performs
//! when it hands a task its window. Like the Jenkins pool, one instance is
//! built from config at process start and injected as a [`TrackerClient`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use autolt_core::config::TrackerConfig;
use autolt_core::error::{AutoLtError, Result};
use autolt_core::traits::TrackerClient;
use autolt_core::types::{PipelineKind, TrackedTask};

/// Connection pool + credentials for one tracker endpoint.
pub struct JiraTracker {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_token: String,
    /// Kind assumed for issues without an `EKP`/`INFOSRV` label.
    default_kind: PipelineKind,
}

impl JiraTracker {
    pub fn new(config: &TrackerConfig, default_kind: PipelineKind) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("AutoLT/0.3")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AutoLtError::Tracker(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_token: config.api_token.clone(),
            default_kind,
        })
    }

    fn api(&self, tail: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, tail)
    }

    /// Find the transition id whose target status matches `status`.
    async fn transition_id(&self, key: &str, status: &str) -> Result<Option<String>> {
        let url = self.api(&format!("issue/{key}/transitions"));
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await
            .map_err(|e| AutoLtError::Tracker(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AutoLtError::Tracker(format!("GET {url}: HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AutoLtError::Tracker(format!("transitions for {key}: bad JSON: {e}")))?;
        let id = body["transitions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| {
                t["to"]["name"]
                    .as_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(status))
            })
            .and_then(|t| t["id"].as_str())
            .map(|s| s.to_string());
        Ok(id)
    }
}

#[async_trait]
impl TrackerClient for JiraTracker {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<TrackedTask>> {
        let url = self.api("search");
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .query(&[("jql", query), ("maxResults", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| AutoLtError::Tracker(format!("search: {e}")))?;
        if !resp.status().is_success() {
            return Err(AutoLtError::Tracker(format!("search: HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AutoLtError::Tracker(format!("search: bad JSON: {e}")))?;

        let tasks: Vec<TrackedTask> = body["issues"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|issue| task_from_issue(issue, self.default_kind))
            .collect();
        tracing::info!("📥 Tracker search returned {} tasks", tasks.len());
        Ok(tasks)
    }

    async fn update_status_and_schedule(
        &self,
        key: &str,
        status: &str,
        planned_start: DateTime<Utc>,
        planned_end: DateTime<Utc>,
    ) -> Result<()> {
        // Window bounds first - if the field write fails we have not moved
        // the issue, so the allocator can safely skip the task.
        let url = self.api(&format!("issue/{key}"));
        let resp = self
            .client
            .put(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .json(&serde_json::json!({
                "fields": {
                    "duedate": planned_start.format("%Y-%m-%d").to_string(),
                },
                "update": {
                    "comment": [{"add": {"body": format!(
                        "AutoLT: scheduled {} → {}",
                        planned_start.format("%Y-%m-%d %H:%M"),
                        planned_end.format("%Y-%m-%d %H:%M"),
                    )}}]
                }
            }))
            .send()
            .await
            .map_err(|e| AutoLtError::Tracker(format!("update {key}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AutoLtError::Tracker(format!(
                "update {key}: HTTP {}",
                resp.status()
            )));
        }

        if let Some(id) = self.transition_id(key, status).await? {
            let url = self.api(&format!("issue/{key}/transitions"));
            let resp = self
                .client
                .post(&url)
                .basic_auth(&self.username, Some(&self.api_token))
                .json(&serde_json::json!({"transition": {"id": id}}))
                .send()
                .await
                .map_err(|e| AutoLtError::Tracker(format!("transition {key}: {e}")))?;
            if !resp.status().is_success() {
                return Err(AutoLtError::Tracker(format!(
                    "transition {key}: HTTP {}",
                    resp.status()
                )));
            }
        } else {
            tracing::warn!("⚠️ No '{}' transition available for {}", status, key);
        }

        tracing::info!("✅ Tracker updated: {} → {} @ {}", key, status, planned_start);
        Ok(())
    }
}

/// Map one search-result issue into the local task mirror shape.
fn task_from_issue(issue: &serde_json::Value, default_kind: PipelineKind) -> Option<TrackedTask> {
    let key = issue["key"].as_str()?;
    let fields = &issue["fields"];
    let summary = fields["summary"].as_str().unwrap_or("");
    let status = fields["status"]["name"].as_str().unwrap_or("Open");

    let pipeline = fields["labels"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|l| l.as_str())
        .find_map(|l| l.parse::<PipelineKind>().ok())
        .unwrap_or(default_kind);

    // Due date doubles as the requested start - the allocator orders by it.
    let planned_start = fields["duedate"]
        .as_str()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    Some(TrackedTask {
        key: key.to_string(),
        summary: summary.to_string(),
        status: status.to_string(),
        pipeline,
        planned_start,
        last_synced: Utc::now(),
    })
}
