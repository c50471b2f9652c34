//! Segment prefetch loop.
//!
//! [`PrefetchLoop`] owns a background task that keeps the [`ReadyQueue`] near
//! its prefetch target. Jobs are submitted and awaited one at a time, so
//! segments reach the queue in sequence-number order. Every remote failure is
//! absorbed here and turned into exponential backoff; the consumer only ever
//! sees [`get_next`](PrefetchLoop::get_next) come back empty for longer.
//!
//! # Example
//!
//! ```rust,ignore
//! let generator = PrefetchLoop::new(job_client, settings)?;
//! generator.start();
//! if let Some(segment) = generator.get_next(Duration::from_secs(5)).await {
//!     player.play(&segment.path).await?;
//! }
//! generator.stop().await;
//! ```

mod backoff;
mod store;
mod types;

pub use backoff::backoff_delay;
pub use store::SegmentStore;
pub use types::*;

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::{JobClient, JobOutcome};
use crate::queue::{ReadyQueue, Segment};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// State shared between the handle and the background task.
struct Shared {
    client: JobClient,
    queue: ReadyQueue,
    store: SegmentStore,
    settings: PrefetchSettings,
    running: AtomicBool,
    consecutive_failures: AtomicU32,
    segment_counter: AtomicU64,
    segments_generated: AtomicU64,
    generation_failures: AtomicU64,
    escalations: AtomicU64,
    events: broadcast::Sender<PipelineEvent>,
}

struct Control {
    state: LoopState,
    handle: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    /// Flips to `true` once a stop has finished; late `stop()` callers wait
    /// on it.
    exited: Option<watch::Receiver<bool>>,
    exit_signal: Option<watch::Sender<bool>>,
}

/// What a `stop()` call has to do: drive the shutdown, or wait for the call
/// that already is.
enum StopRole {
    Leader {
        handle: Option<JoinHandle<()>>,
        cancel: Option<CancellationToken>,
        exit_signal: Option<watch::Sender<bool>>,
    },
    Waiter(Option<watch::Receiver<bool>>),
}

/// Handle to the prefetch pipeline.
///
/// `start`, `stop`, `get_next`, `queue_size` and `stats` may be called
/// concurrently from any task. Only the background task submits jobs or
/// pushes segments.
pub struct PrefetchLoop {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl PrefetchLoop {
    /// Validate `settings` and prepare the output directory.
    ///
    /// The loop is created idle; call [`start`](Self::start) to begin
    /// generating.
    pub fn new(client: JobClient, settings: PrefetchSettings) -> Result<Self, SettingsError> {
        settings.validate()?;

        if settings.prefetch_target == 0 {
            warn!("Prefetch target is 0; the loop will never submit generation requests");
        }

        let store = SegmentStore::open(&settings.output_dir).map_err(|source| {
            SettingsError::OutputDir {
                path: settings.output_dir.clone(),
                source,
            }
        })?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                queue: ReadyQueue::new(),
                store,
                settings,
                running: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                segment_counter: AtomicU64::new(0),
                segments_generated: AtomicU64::new(0),
                generation_failures: AtomicU64::new(0),
                escalations: AtomicU64::new(0),
                events,
            }),
            control: Mutex::new(Control {
                state: LoopState::Idle,
                handle: None,
                cancel: None,
                exited: None,
                exit_signal: None,
            }),
        })
    }

    pub fn settings(&self) -> &PrefetchSettings {
        &self.shared.settings
    }

    /// Spawn the background task. A no-op unless the loop is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut control = self.control.lock();
        if control.state != LoopState::Idle {
            warn!(state = ?control.state, "Prefetch loop is already running; ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        let (exit_signal, exited) = watch::channel(false);
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));

        control.state = LoopState::Running;
        control.handle = Some(handle);
        control.cancel = Some(cancel);
        control.exited = Some(exited);
        control.exit_signal = Some(exit_signal);

        info!(
            prefetch_target = self.shared.settings.prefetch_target,
            segment_duration_secs = self.shared.settings.segment_duration_secs,
            "Prefetch loop started"
        );
    }

    /// Ask the loop to exit and wait for it.
    ///
    /// The loop leaves at its next iteration boundary; sleeps between
    /// iterations are cut short, but a job that is being awaited runs to its
    /// own completion or timeout first. If the task is still alive after the
    /// configured stop timeout it is aborted. Concurrent callers all return
    /// only once the loop is idle again.
    pub async fn stop(&self) {
        let role = {
            let mut control = self.control.lock();
            let state = control.state;
            match state {
                LoopState::Idle => {
                    debug!("Prefetch loop is not running; ignoring stop");
                    return;
                }
                LoopState::Stopping => StopRole::Waiter(control.exited.clone()),
                LoopState::Running => {
                    control.state = LoopState::Stopping;
                    StopRole::Leader {
                        handle: control.handle.take(),
                        cancel: control.cancel.take(),
                        exit_signal: control.exit_signal.take(),
                    }
                }
            }
        };

        let (handle, cancel, exit_signal) = match role {
            StopRole::Leader {
                handle,
                cancel,
                exit_signal,
            } => (handle, cancel, exit_signal),
            StopRole::Waiter(exited) => {
                debug!("Prefetch loop is already stopping; waiting for it");
                if let Some(exited) = exited {
                    wait_until_exited(exited).await;
                }
                return;
            }
        };

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if let Some(mut handle) = handle {
            let stop_timeout = self.shared.settings.stop_timeout;
            match tokio::time::timeout(stop_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Prefetch loop task ended abnormally");
                    self.shared.emit(PipelineEvent::Stopped);
                }
                Err(_) => {
                    warn!(
                        timeout_secs = stop_timeout.as_secs(),
                        "Prefetch loop did not stop in time; aborting it"
                    );
                    handle.abort();
                    self.shared.emit(PipelineEvent::Stopped);
                }
            }
        }

        {
            let mut control = self.control.lock();
            control.state = LoopState::Idle;
            control.exited = None;
        }
        if let Some(exit_signal) = exit_signal {
            exit_signal.send_replace(true);
        }
        info!("Prefetch loop stopped");
    }

    pub fn state(&self) -> LoopState {
        self.control.lock().state
    }

    /// Take the next ready segment, waiting up to `timeout`.
    pub async fn get_next(&self, timeout: Duration) -> Option<Segment> {
        self.shared.queue.pop(timeout).await
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> PipelineStats {
        let shared = &self.shared;
        PipelineStats {
            state: self.state(),
            queue_size: shared.queue.len(),
            segments_generated: shared.segments_generated.load(Ordering::Relaxed),
            generation_failures: shared.generation_failures.load(Ordering::Relaxed),
            escalations: shared.escalations.load(Ordering::Relaxed),
            consecutive_failures: shared.consecutive_failures.load(Ordering::Relaxed),
            last_sequence_number: shared.segment_counter.load(Ordering::Relaxed),
        }
    }

    /// Receive loop events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for PrefetchLoop {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.control.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

/// Body of the background task.
async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    shared.emit(PipelineEvent::Started);

    while shared.running.load(Ordering::SeqCst) {
        let depth = shared.queue.len();
        if depth >= shared.settings.prefetch_target {
            trace!(depth, target = shared.settings.prefetch_target, "Queue at target; idling");
            if !pause(&cancel, shared.settings.idle_interval).await {
                break;
            }
            continue;
        }

        let sequence_number = shared.segment_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let result = AssertUnwindSafe(shared.produce_segment(sequence_number))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SegmentError::Internal(panic_message(panic.as_ref()))));

        match result {
            Ok(segment) => shared.record_success(segment, started.elapsed()),
            Err(e) => {
                if !shared.record_failure(sequence_number, e, &cancel).await {
                    break;
                }
            }
        }
    }

    shared.emit(PipelineEvent::Stopped);
    info!("Prefetch loop exited");
}

impl Shared {
    fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            trace!("No subscribers for pipeline event");
        }
    }

    /// Submit, await, download and persist one segment.
    async fn produce_segment(&self, sequence_number: u64) -> Result<Segment, SegmentError> {
        let duration_secs = self.settings.segment_duration_secs;

        info!(sequence_number, duration_secs, "Generating segment");
        self.emit(PipelineEvent::GenerationStarted { sequence_number });

        let job_id = self
            .client
            .submit(&self.settings.prompt, duration_secs)
            .await?;

        let output = match self.client.await_completion(&job_id).await {
            JobOutcome::Succeeded(output) => output,
            JobOutcome::Failed(reason) => return Err(SegmentError::JobFailed(reason)),
            JobOutcome::TimedOut(limit) => return Err(SegmentError::TimedOut(limit)),
        };

        let locator = output.locator.ok_or(SegmentError::MissingOutput)?;
        let audio = self.client.fetch(&locator).await?;
        if audio.is_empty() {
            return Err(SegmentError::MissingOutput);
        }

        let path = self.store.persist(sequence_number, &audio).await?;

        Ok(Segment {
            sequence_number,
            duration_secs,
            path,
        })
    }

    fn record_success(&self, segment: Segment, elapsed: Duration) {
        let sequence_number = segment.sequence_number;
        let path = segment.path.clone();

        self.queue.push(segment);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.segments_generated.fetch_add(1, Ordering::Relaxed);

        info!(
            sequence_number,
            path = %path.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            queue_size = self.queue.len(),
            "Segment ready"
        );

        self.emit(PipelineEvent::SegmentReady {
            sequence_number,
            path,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    /// Count a failure and sleep it off. Returns `false` if the loop was
    /// cancelled while sleeping.
    async fn record_failure(
        &self,
        sequence_number: u64,
        error: SegmentError,
        cancel: &CancellationToken,
    ) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.generation_failures.fetch_add(1, Ordering::Relaxed);

        let delay = backoff_delay(failures, self.settings.max_backoff);
        warn!(
            sequence_number,
            consecutive_failures = failures,
            delay_secs = delay.as_secs(),
            error = %error,
            "Segment generation failed; backing off"
        );

        self.emit(PipelineEvent::GenerationFailed {
            sequence_number,
            error: error.to_string(),
        });

        let threshold = self.settings.escalation_threshold;
        if failures == threshold {
            self.escalations.fetch_add(1, Ordering::Relaxed);
            error!(
                consecutive_failures = failures,
                "Generation keeps failing; check the state of the generation service"
            );
            self.emit(PipelineEvent::Escalated {
                consecutive_failures: failures,
            });
        }

        self.emit(PipelineEvent::BackingOff {
            consecutive_failures: failures,
            delay_secs: delay.as_secs(),
        });
        if !pause(cancel, delay).await {
            return false;
        }

        if failures >= threshold {
            debug!(cooldown_secs = self.settings.cooldown.as_secs(), "Cooling down");
            if !pause(cancel, self.settings.cooldown).await {
                return false;
            }
        }

        true
    }
}

/// Resolve once the stopping caller reports the loop as exited.
async fn wait_until_exited(mut exited: watch::Receiver<bool>) {
    while !*exited.borrow_and_update() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic in prefetch iteration".to_string()
    }
}
