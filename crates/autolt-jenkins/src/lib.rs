//! # AutoLT Jenkins client
//!
//! Thin build-server client over the Jenkins JSON API. One `JenkinsPool` is
//! constructed at process start from config and injected wherever a
//! [`BuildClient`] is needed - it owns the long-lived `reqwest::Client`
//! (and with it the connection pool), so nothing downstream opens ad-hoc
//! connections.

use async_trait::async_trait;
use autolt_core::config::JenkinsConfig;
use autolt_core::error::{AutoLtError, Result};
use autolt_core::traits::BuildClient;
use autolt_core::types::{BuildResult, JobStatus};

/// Connection pool + credentials for one Jenkins endpoint.
pub struct JenkinsPool {
    client: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
}

impl JenkinsPool {
    /// Build a pool from config. Fails only on a malformed HTTP client
    /// setup - connectivity is checked lazily, per call.
    pub fn new(config: &JenkinsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("AutoLT/0.3")
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AutoLtError::BuildServer(format!("HTTP client setup: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            token: config.token.clone(),
        })
    }

    fn job_url(&self, job: &str, tail: &str) -> String {
        format!("{}/job/{}/{}", self.base_url, job, tail)
    }

    async fn get_job_json(&self, job: &str) -> Result<serde_json::Value> {
        let url = self.job_url(job, "api/json");
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.token))
            .send()
            .await
            .map_err(|e| AutoLtError::BuildServer(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AutoLtError::BuildServer(format!(
                "GET {url}: HTTP {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AutoLtError::BuildServer(format!("GET {url}: bad JSON: {e}")))
    }

    /// Last build number of a job, if it has ever built.
    async fn last_build_number(&self, job: &str) -> Result<Option<i64>> {
        let info = self.get_job_json(job).await?;
        Ok(info["lastBuild"]["number"].as_i64())
    }
}

#[async_trait]
impl BuildClient for JenkinsPool {
    async fn trigger(&self, job: &str, parameters: Option<&serde_json::Value>) -> Result<i64> {
        let url = match parameters {
            Some(_) => self.job_url(job, "buildWithParameters"),
            None => self.job_url(job, "build"),
        };

        let mut req = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.token));
        if let Some(params) = parameters.and_then(|p| p.as_object()) {
            let pairs: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    let val = v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string());
                    (k.clone(), val)
                })
                .collect();
            req = req.query(&pairs);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AutoLtError::BuildServer(format!("trigger {job}: {e}")))?;

        if !resp.status().is_success() {
            return Err(AutoLtError::BuildServer(format!(
                "trigger {job}: HTTP {}",
                resp.status()
            )));
        }

        // Jenkins answers 201 with a Location header pointing at the queue item.
        let queue_id = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_queue_id)
            .unwrap_or(0);
        tracing::info!("🚀 Triggered job {} (queue item {})", job, queue_id);
        Ok(queue_id)
    }

    async fn stop(&self, job: &str, build: Option<i64>) -> Result<()> {
        let number = match build {
            Some(n) => n,
            None => self
                .last_build_number(job)
                .await?
                .ok_or_else(|| AutoLtError::BuildServer(format!("stop {job}: no builds")))?,
        };
        let url = self.job_url(job, &format!("{number}/stop"));
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.token))
            .send()
            .await
            .map_err(|e| AutoLtError::BuildServer(format!("stop {job}#{number}: {e}")))?;

        // Jenkins redirects after a stop; anything below 400 counts.
        if resp.status().is_client_error() || resp.status().is_server_error() {
            return Err(AutoLtError::BuildServer(format!(
                "stop {job}#{number}: HTTP {}",
                resp.status()
            )));
        }
        tracing::info!("🛑 Stopped job {}#{}", job, number);
        Ok(())
    }

    async fn status(&self, job: &str) -> Result<JobStatus> {
        let info = self.get_job_json(job).await?;
        Ok(status_from_job_json(&info))
    }
}

/// Map a job's `api/json` document to a [`JobStatus`].
///
/// A `*_anime` color means a build is in flight; the base color carries the
/// last completed result.
fn status_from_job_json(info: &serde_json::Value) -> JobStatus {
    let color = info["color"].as_str().unwrap_or("");
    let running = color.ends_with("_anime");
    let queued = info["inQueue"].as_bool().unwrap_or(false);
    let last_result = match color.trim_end_matches("_anime") {
        "blue" => Some(BuildResult::Success),
        "red" => Some(BuildResult::Failure),
        "yellow" => Some(BuildResult::Unstable),
        "aborted" => Some(BuildResult::Aborted),
        "" | "notbuilt" | "disabled" | "grey" => None,
        _ => Some(BuildResult::Unknown),
    };
    JobStatus {
        running,
        queued,
        last_result,
    }
}

/// Pull the queue item id out of a trigger response `Location` header,
/// e.g. `https://ci/queue/item/123/`.
fn parse_queue_id(location: &str) -> Option<i64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queue_id() {
        assert_eq!(parse_queue_id("https://ci/queue/item/123/"), Some(123));
        assert_eq!(parse_queue_id("https://ci/queue/item/9"), Some(9));
        assert_eq!(parse_queue_id("https://ci/queue/item/"), None);
    }

    #[test]
    fn test_status_running_build() {
        let info = serde_json::json!({"color": "blue_anime", "inQueue": false});
        let status = status_from_job_json(&info);
        assert!(status.running);
        assert!(!status.queued);
        assert_eq!(status.last_result, Some(BuildResult::Success));
    }

    #[test]
    fn test_status_queued_counts_as_active() {
        let info = serde_json::json!({"color": "red", "inQueue": true});
        let status = status_from_job_json(&info);
        assert!(!status.running);
        assert!(status.queued);
        assert!(status.is_active());
        assert_eq!(status.last_result, Some(BuildResult::Failure));
    }

    #[test]
    fn test_status_never_built() {
        let info = serde_json::json!({"color": "notbuilt", "inQueue": false});
        let status = status_from_job_json(&info);
        assert!(!status.is_active());
        assert_eq!(status.last_result, None);
    }
}
