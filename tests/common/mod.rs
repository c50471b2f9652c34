//! Shared test harness for integration tests.
//!
//! Provides [`ScriptedService`], an in-process [`GenerationService`] whose
//! jobs follow a per-submission [`Plan`], and helpers for building a
//! [`PrefetchLoop`] around it and waiting on its events.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use worksound::client::{
    FetchError, GenerationService, JobClient, JobId, JobOutput, JobStatus, OutputLocator,
    PollError, SubmitError, WaitPolicy,
};
use worksound::generator::{PipelineEvent, PrefetchLoop, PrefetchSettings};

/// How one submission behaves.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    /// The submit call itself fails.
    RejectSubmit,
    /// The job stays pending for `pending_polls` polls, then succeeds.
    Succeed { pending_polls: u32 },
    /// The job stays pending for `pending_polls` polls, then fails.
    Fail { pending_polls: u32, reason: &'static str },
    /// The job succeeds without any output reference.
    SucceedWithoutOutput,
    /// Every poll of the job is a transport error.
    Unreachable,
    /// Polling the job panics.
    Panic,
}

struct ActiveJob {
    plan: Plan,
    polls: u32,
}

/// Fake generation service driven by a script of [`Plan`]s.
pub struct ScriptedService {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    jobs: Mutex<HashMap<String, ActiveJob>>,
    next_id: AtomicU64,
    submissions: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedService {
    /// Replay `plans` in order, then use `fallback` for every later submission.
    pub fn new(plans: Vec<Plan>, fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
            fallback,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            submissions: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Every submission succeeds after a single pending poll.
    pub fn always_succeeding() -> Arc<Self> {
        Self::new(Vec::new(), Plan::Succeed { pending_polls: 1 })
    }

    /// Number of submit calls received, successful or not.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of jobs that reached a terminal status.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn finish(&self, job_id: &JobId) {
        self.jobs.lock().remove(job_id.as_str());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Audio bytes the fake serves for a job.
pub fn audio_for(job_id: &str) -> Vec<u8> {
    format!("RIFF-audio-for-{}", job_id).into_bytes()
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn submit(&self, _prompt: &str, _duration_secs: u32) -> Result<JobId, SubmitError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().pop_front().unwrap_or(self.fallback);

        if let Plan::RejectSubmit = plan {
            return Err(SubmitError::Transport("connection refused".into()));
        }

        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().insert(id.clone(), ActiveJob { plan, polls: 0 });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        Ok(JobId::new(id))
    }

    async fn poll(&self, job_id: &JobId) -> Result<JobStatus, PollError> {
        let (plan, polls) = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(job_id.as_str()) else {
                return Ok(JobStatus::Pending);
            };
            job.polls += 1;
            (job.plan, job.polls)
        };

        match plan {
            Plan::RejectSubmit => unreachable!("rejected submissions have no job"),
            Plan::Succeed { pending_polls } if polls > pending_polls => {
                self.finish(job_id);
                Ok(JobStatus::Succeeded(JobOutput {
                    locator: Some(OutputLocator::Remote(format!(
                        "/output/{}.wav",
                        job_id.as_str()
                    ))),
                    raw: serde_json::json!({"file": format!("/output/{}.wav", job_id)}),
                }))
            }
            Plan::Fail {
                pending_polls,
                reason,
            } if polls > pending_polls => {
                self.finish(job_id);
                Ok(JobStatus::Failed(reason.to_string()))
            }
            Plan::Succeed { .. } | Plan::Fail { .. } => Ok(JobStatus::Pending),
            Plan::SucceedWithoutOutput => {
                self.finish(job_id);
                Ok(JobStatus::Succeeded(JobOutput {
                    locator: None,
                    raw: serde_json::json!({}),
                }))
            }
            Plan::Unreachable => {
                if polls > policy().max_poll_retries {
                    self.finish(job_id);
                }
                Err(PollError::Transport("service unavailable".into()))
            }
            Plan::Panic => {
                self.finish(job_id);
                panic!("scripted poll panic");
            }
        }
    }

    async fn fetch_output(&self, resource: &str) -> Result<Bytes, FetchError> {
        let job_id = resource
            .trim_start_matches("/output/")
            .trim_end_matches(".wav");
        Ok(Bytes::from(audio_for(job_id)))
    }
}

/// Polling policy used by the loop tests.
pub fn policy() -> WaitPolicy {
    WaitPolicy {
        poll_interval: Duration::from_secs(1),
        timeout: Duration::from_secs(300),
        max_poll_retries: 2,
    }
}

/// Loop settings with short idle checks and a generous stop timeout.
pub fn settings(output_dir: &Path, prefetch_target: usize) -> PrefetchSettings {
    PrefetchSettings {
        prompt: "soft rain and distant piano".to_string(),
        segment_duration_secs: 10,
        prefetch_target,
        output_dir: output_dir.to_path_buf(),
        idle_interval: Duration::from_millis(100),
        max_backoff: Duration::from_secs(16),
        escalation_threshold: 5,
        cooldown: Duration::from_secs(10),
        stop_timeout: Duration::from_secs(3600),
    }
}

pub fn build_loop(service: Arc<ScriptedService>, settings: PrefetchSettings) -> PrefetchLoop {
    let client = JobClient::new(service, policy());
    PrefetchLoop::new(client, settings).expect("valid settings")
}

/// Receive events until `predicate` matches, returning everything received.
pub async fn collect_until<F>(
    events: &mut broadcast::Receiver<PipelineEvent>,
    mut predicate: F,
) -> Vec<PipelineEvent>
where
    F: FnMut(&PipelineEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(24 * 3600), events.recv())
            .await
            .expect("timed out waiting for pipeline event");
        match event {
            Ok(event) => {
                let done = predicate(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}
