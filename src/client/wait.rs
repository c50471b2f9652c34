use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use super::types::{JobId, JobOutcome, JobStatus, WaitLimit, WaitPolicy};
use super::GenerationService;

/// Drive one job to a terminal outcome by polling at a fixed interval.
///
/// Poll errors are soft: they are counted, and the count resets whenever a
/// poll succeeds. Once the count exceeds `max_poll_retries` the wait ends
/// with [`WaitLimit::PollErrors`].
pub(super) async fn await_completion(
    service: &dyn GenerationService,
    job_id: &JobId,
    policy: &WaitPolicy,
) -> JobOutcome {
    let deadline = Instant::now() + policy.timeout;
    let mut poll_errors: u32 = 0;

    while Instant::now() < deadline {
        match service.poll(job_id).await {
            Ok(JobStatus::Succeeded(output)) => {
                debug!(job_id = %job_id, "Job succeeded");
                return JobOutcome::Succeeded(output);
            }
            Ok(JobStatus::Failed(reason)) => {
                error!(job_id = %job_id, reason = %reason, "Job failed");
                return JobOutcome::Failed(reason);
            }
            Ok(JobStatus::Pending) => {
                poll_errors = 0;
                debug!(job_id = %job_id, "Job still running");
            }
            Err(e) => {
                poll_errors += 1;
                if poll_errors > policy.max_poll_retries {
                    error!(
                        job_id = %job_id,
                        poll_errors,
                        error = %e,
                        "Poll retry budget exhausted"
                    );
                    return JobOutcome::TimedOut(WaitLimit::PollErrors(poll_errors));
                }
                warn!(job_id = %job_id, poll_errors, error = %e, "Poll failed; retrying");
            }
        }

        sleep(policy.poll_interval).await;
    }

    error!(job_id = %job_id, timeout_secs = policy.timeout.as_secs(), "Timed out waiting for job");
    JobOutcome::TimedOut(WaitLimit::Deadline(policy.timeout))
}
