//! Shared wait primitives: fixed phase sleeps and the bounded spin-wait the
//! deploy phase uses against the eventually consistent build server.

use std::time::Duration;

use autolt_core::traits::BuildClient;

/// Unconditional wait (warm-up / soak). Not a poll - the environment needs
/// the full interval regardless of job state.
pub async fn sleep_phase(duration: Duration, label: &str) {
    tracing::info!("⏰ Waiting {}s ({})", duration.as_secs(), label);
    tokio::time::sleep(duration).await;
}

/// Poll `job` every `poll_every` until it is no longer running or queued,
/// up to `timeout`. Returns `true` if the job stopped in time.
///
/// A status call that fails is treated as "stopped" - the build server is
/// only eventually consistent and the surrounding phase is best-effort, so
/// a blip must not wedge a multi-hour pipeline.
pub async fn wait_for_job_stop(
    build: &dyn BuildClient,
    job: &str,
    poll_every: Duration,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let active = match build.status(job).await {
            Ok(status) => status.is_active(),
            Err(e) => {
                tracing::warn!("⚠️ Could not check status for job {}: {}", job, e);
                false
            }
        };
        if !active {
            tracing::info!("✅ Job {} completed", job);
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                "⚠️ Job {} did not complete within {}s",
                job,
                timeout.as_secs()
            );
            return false;
        }
        tokio::time::sleep(poll_every).await;
    }
}
