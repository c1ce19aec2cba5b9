//! Process supervisor
//!
//! Owns one encoder per live stream, classifies encoder exits and decides
//! between restart and terminal stop. All per-stream state (duration
//! registry, supervised runs, backup timers) sits behind a single lock, and
//! every transition out of `live` goes through [`ProcessSupervisor::finish`],
//! which is idempotent.
//!
//! Each run gets a generation number and a cancellation token. The token stops
//! the monitor task and any pending restart; the generation lets late exit
//! events and backup timers recognise that the run they belong to is gone.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{StopReason, Stream, StreamStatus, validate_duration};
use crate::repositories::StreamRepository;
use crate::services::duration_tracker::{DurationInfo, DurationTracker};
use crate::services::encoder_command::EncoderInvocation;
use crate::services::encoder_process::{EncoderExit, EncoderLauncher, EncoderProcess};
use crate::services::termination::BackupTimers;
use crate::utils::SharedClock;
use crate::utils::retry::RetryConfig;
use crate::utils::time::{to_chrono, until};

/// Tunables for supervision
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Restarts allowed per run before the stream is marked errored
    pub max_retries: u32,
    pub restart_backoff: RetryConfig,
    /// Grace given to an encoder between quit and kill
    pub terminate_timeout: Duration,
    /// Backup timer fires this long after the expected end
    pub backup_grace: Duration,
    pub ending_soon_threshold: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.supervisor.max_retries,
            restart_backoff: config.supervisor.restart_backoff(),
            terminate_timeout: config.encoder.terminate_timeout,
            backup_grace: config.termination.backup_grace,
            ending_soon_threshold: config.termination.ending_soon_threshold,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Snapshot of a supervised stream for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveStreamInfo {
    pub stream_id: Uuid,
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub expected_end_time: DateTime<Utc>,
    /// Negative once overdue
    pub remaining_seconds: i64,
    pub ending_soon: bool,
    pub retry_count: u32,
    pub restart_pending: bool,
}

/// Outcome of [`ProcessSupervisor::recover_orphans`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Encoders relaunched for their remaining time
    pub resumed: Vec<Uuid>,
    /// Streams whose duration elapsed while nothing supervised them
    pub completed: Vec<Uuid>,
}

struct SupervisedRun {
    generation: u64,
    token: CancellationToken,
    pid: Option<u32>,
    retry_count: u32,
    restart_pending: bool,
    /// Monitor or pending-restart task currently driving the run
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SupervisorState {
    durations: DurationTracker,
    runs: HashMap<Uuid, SupervisedRun>,
    backup_timers: BackupTimers,
    next_generation: u64,
}

impl SupervisorState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_current(&self, stream_id: &Uuid, generation: u64) -> bool {
        self.runs
            .get(stream_id)
            .is_some_and(|run| run.generation == generation)
    }
}

/// Starts, restarts and stops encoders for streams
#[derive(Clone)]
pub struct ProcessSupervisor {
    streams: Arc<dyn StreamRepository>,
    launcher: Arc<dyn EncoderLauncher>,
    clock: SharedClock,
    settings: Arc<SupervisorSettings>,
    /// Held for the whole of every transition, across encoder launch and
    /// repository writes, so start, stop, sweep, exit handling and restart
    /// never interleave for any stream. Never lock it from inside a transition.
    state: Arc<Mutex<SupervisorState>>,
}

impl ProcessSupervisor {
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        launcher: Arc<dyn EncoderLauncher>,
        clock: SharedClock,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            streams,
            launcher,
            clock,
            settings: Arc::new(settings),
            state: Arc::new(Mutex::new(SupervisorState::default())),
        }
    }

    /// Start an encoder for `stream_id` and move the stream to `live`.
    ///
    /// On spawn failure the stream stays where it was, the error is recorded
    /// as its `last_error` and no duration entry is left behind.
    pub async fn start(&self, stream_id: Uuid) -> SupervisorResult<DurationInfo> {
        let stream = self
            .streams
            .find_by_id(stream_id)
            .await?
            .ok_or(SupervisorError::StreamNotFound(stream_id))?;

        let invalid_duration = SupervisorError::InvalidDuration {
            stream_id,
            minutes: stream.duration_minutes,
        };
        if validate_duration(stream.duration_minutes).is_err() {
            return Err(invalid_duration);
        }

        let mut state = self.state.lock().await;
        if state.runs.contains_key(&stream_id) {
            return Err(SupervisorError::AlreadyLive(stream_id));
        }

        let now = self.clock.now();
        let Some(info) = state
            .durations
            .set_duration(stream_id, now, stream.duration_minutes)
        else {
            return Err(invalid_duration);
        };
        let invocation = invocation_for(&stream, info.remaining_at(now));

        let process = match self.launcher.launch(stream_id, &invocation).await {
            Ok(process) => process,
            Err(e) => {
                state.durations.clear(&stream_id);
                error!("Failed to start encoder for stream {}: {}", stream_id, e);
                let message = e.to_string();
                if let Err(repo_err) = self
                    .streams
                    .record_error(stream_id, format!("failed to start encoder: {message}"))
                    .await
                {
                    warn!(
                        "Failed to record start error for stream {}: {}",
                        stream_id, repo_err
                    );
                }
                return Err(SupervisorError::SpawnFailed { stream_id, message });
            }
        };

        if let Err(e) = self.streams.mark_live(stream_id, now).await {
            // Dropping the handle kills the encoder
            state.durations.clear(&stream_id);
            drop(process);
            return Err(e.into());
        }

        let generation = state.next_generation();
        let token = CancellationToken::new();
        let pid = process.pid();
        let task = self.spawn_monitor(stream_id, generation, process, token.clone());
        state.runs.insert(
            stream_id,
            SupervisedRun {
                generation,
                token,
                pid,
                retry_count: 0,
                restart_pending: false,
                task: Some(task),
            },
        );
        self.arm_backup_timer(&mut state, stream_id, generation, info.expected_end_time, now);

        info!(
            "Stream {} ('{}') is live for {} minutes, expected end {}",
            stream_id, stream.title, stream.duration_minutes, info.expected_end_time
        );
        Ok(info)
    }

    /// Manual stop. Stopping a stream that is not live is a no-op returning `false`.
    pub async fn stop(&self, stream_id: Uuid) -> SupervisorResult<bool> {
        self.stop_with_reason(stream_id, StopReason::Manual).await
    }

    /// Stop with an explicit reason; shared by manual stop, the sweep and shutdown
    pub async fn stop_with_reason(
        &self,
        stream_id: Uuid,
        reason: StopReason,
    ) -> SupervisorResult<bool> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let stopped = self.finish(&mut state, stream_id, reason, now).await?;

        if !stopped {
            debug!("Stream {} is not live, nothing to stop", stream_id);
        } else if reason.is_force_stop() {
            warn!("Force-stopped stream {} ({})", stream_id, reason);
        } else {
            info!("Stopped stream {} ({})", stream_id, reason);
        }
        Ok(stopped)
    }

    /// Force stop from a backup timer, ignored unless `generation` is still the current run
    async fn force_stop_run(
        &self,
        stream_id: Uuid,
        generation: u64,
        reason: StopReason,
    ) -> SupervisorResult<bool> {
        let mut state = self.state.lock().await;
        if !state.is_current(&stream_id, generation) {
            debug!(
                "Ignoring {} for stream {}: run {} is gone",
                reason, stream_id, generation
            );
            return Ok(false);
        }

        let now = self.clock.now();
        let stopped = self.finish(&mut state, stream_id, reason, now).await?;
        if stopped {
            warn!(
                "Force-stopped stream {} ({}): encoder outlived its duration",
                stream_id, reason
            );
        }
        Ok(stopped)
    }

    /// Relaunch encoders for `live` streams nobody supervises, typically after
    /// a service restart. Expired ones are completed instead.
    pub async fn recover_orphans(&self) -> SupervisorResult<RecoverySummary> {
        let live = self.streams.find_by_status(StreamStatus::Live).await?;
        let mut summary = RecoverySummary::default();

        for stream in live {
            match self.resume(&stream).await {
                Ok(Some(true)) => summary.resumed.push(stream.id),
                Ok(Some(false)) => summary.completed.push(stream.id),
                Ok(None) => {}
                Err(e) => warn!("Failed to recover stream {}: {}", stream.id, e),
            }
        }

        if !summary.resumed.is_empty() || !summary.completed.is_empty() {
            info!(
                "Recovered live streams: {} resumed, {} completed",
                summary.resumed.len(),
                summary.completed.len()
            );
        }
        Ok(summary)
    }

    /// `Some(true)` when relaunched, `Some(false)` when completed, `None` when
    /// already supervised
    async fn resume(&self, stream: &Stream) -> SupervisorResult<Option<bool>> {
        let mut state = self.state.lock().await;
        if state.runs.contains_key(&stream.id) {
            return Ok(None);
        }

        let now = self.clock.now();
        let Some(info) = state.durations.reconstruct(stream) else {
            let problem = if stream.start_time.is_none() {
                "live without a start time".to_string()
            } else {
                format!("live with invalid duration of {} minutes", stream.duration_minutes)
            };
            warn!("Stream {} is {}, marking it errored", stream.id, problem);
            self.streams
                .update_status(stream.id, StreamStatus::Errored, Some(now), None)
                .await?;
            self.streams.record_error(stream.id, problem).await?;
            return Ok(Some(false));
        };

        if info.is_expired_at(now) {
            self.finish(&mut state, stream.id, StopReason::DurationComplete, now)
                .await?;
            return Ok(Some(false));
        }

        let generation = state.next_generation();
        state.runs.insert(
            stream.id,
            SupervisedRun {
                generation,
                token: CancellationToken::new(),
                pid: None,
                retry_count: stream.retry_count,
                restart_pending: true,
                task: None,
            },
        );
        self.arm_backup_timer(&mut state, stream.id, generation, info.expected_end_time, now);
        drop(state);

        info!(
            "Resuming stream {} with {}s remaining",
            stream.id,
            info.remaining_at(now).num_seconds()
        );
        self.relaunch(stream.id, generation).await;
        Ok(Some(true))
    }

    /// Stop every supervised stream and wait for the encoders to exit
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<Uuid> = self.state.lock().await.runs.keys().copied().collect();
        let mut tasks = Vec::new();
        let mut stopped = 0;

        for stream_id in ids {
            if let Some(task) = self
                .state
                .lock()
                .await
                .runs
                .get_mut(&stream_id)
                .and_then(|run| run.task.take())
            {
                tasks.push(task);
            }

            match self.stop_with_reason(stream_id, StopReason::Shutdown).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to stop stream {} during shutdown: {}", stream_id, e),
            }
        }

        self.state.lock().await.backup_timers.cancel_all();

        let wait = self.settings.terminate_timeout + Duration::from_secs(1);
        if tokio::time::timeout(wait, join_all(tasks)).await.is_err() {
            warn!("Timed out waiting for encoders to exit during shutdown");
        }

        info!("Supervisor shut down, stopped {} stream(s)", stopped);
        stopped
    }

    pub async fn active_streams(&self) -> Vec<ActiveStreamInfo> {
        let state = self.state.lock().await;
        let now = self.clock.now();
        let threshold = to_chrono(self.settings.ending_soon_threshold);

        let mut active: Vec<ActiveStreamInfo> = state
            .runs
            .iter()
            .filter_map(|(id, run)| {
                let info = state.durations.get(id)?;
                Some(ActiveStreamInfo {
                    stream_id: *id,
                    pid: run.pid,
                    start_time: info.start_time,
                    expected_end_time: info.expected_end_time,
                    remaining_seconds: info.remaining_at(now).num_seconds(),
                    ending_soon: state.durations.is_ending_soon_at(id, now, threshold),
                    retry_count: run.retry_count,
                    restart_pending: run.restart_pending,
                })
            })
            .collect();

        active.sort_by_key(|info| info.expected_end_time);
        active
    }

    pub async fn is_supervised(&self, stream_id: Uuid) -> bool {
        self.state.lock().await.runs.contains_key(&stream_id)
    }

    pub async fn expected_end(&self, stream_id: Uuid) -> Option<DateTime<Utc>> {
        self.state.lock().await.durations.expected_end(&stream_id)
    }

    pub async fn has_backup_timer(&self, stream_id: Uuid) -> bool {
        self.state.lock().await.backup_timers.is_armed(&stream_id)
    }

    /// Leave `live`: drop the run, cancel its tasks and timer, clear its
    /// duration and persist the new status. Returns `false` without writing
    /// anything when the stream is neither supervised nor live.
    async fn finish(
        &self,
        state: &mut SupervisorState,
        stream_id: Uuid,
        reason: StopReason,
        now: DateTime<Utc>,
    ) -> SupervisorResult<bool> {
        let run = state.runs.remove(&stream_id);
        if let Some(run) = &run {
            run.token.cancel();
        }
        let tracked = state.durations.clear(&stream_id).is_some();
        state.backup_timers.cancel(&stream_id);

        let Some(stream) = self.streams.find_by_id(stream_id).await? else {
            if run.is_some() || tracked {
                warn!("Stream {} disappeared while supervised", stream_id);
                return Ok(true);
            }
            return Err(SupervisorError::StreamNotFound(stream_id));
        };

        if run.is_none() && !tracked && stream.status != StreamStatus::Live {
            return Ok(false);
        }

        let status = status_after(&stream, reason);
        self.streams
            .update_status(stream_id, status, Some(now), Some(reason))
            .await?;
        Ok(true)
    }

    async fn handle_exit(&self, stream_id: Uuid, generation: u64, exit: io::Result<EncoderExit>) {
        let mut state = self.state.lock().await;
        if !state.is_current(&stream_id, generation) {
            debug!("Ignoring exit of superseded encoder for stream {}", stream_id);
            return;
        }

        let exit = exit.unwrap_or_else(|e| EncoderExit {
            code: None,
            success: false,
            last_error: Some(format!("failed to wait for encoder: {e}")),
        });
        let now = self.clock.now();

        if state.durations.is_expired_at(&stream_id, now) {
            let reason = if exit.success {
                StopReason::DurationComplete
            } else {
                StopReason::DurationCompleteWithError
            };
            info!(
                "Stream {} reached its duration (exit code {:?})",
                stream_id, exit.code
            );
            if let Err(e) = self.finish(&mut state, stream_id, reason, now).await {
                error!("Failed to complete stream {}: {}", stream_id, e);
            }
            return;
        }

        let remaining = state
            .durations
            .remaining_at(&stream_id, now)
            .map(|r| r.num_seconds())
            .unwrap_or_default();
        warn!(
            "Encoder for stream {} exited with {}s remaining: {}",
            stream_id,
            remaining,
            exit.describe()
        );
        self.on_failure(&mut state, stream_id, now, exit.describe())
            .await;
    }

    /// Schedule a restart, or mark the stream errored once restarts run out
    async fn on_failure(
        &self,
        state: &mut SupervisorState,
        stream_id: Uuid,
        now: DateTime<Utc>,
        error: String,
    ) {
        let Some(run) = state.runs.get_mut(&stream_id) else {
            return;
        };

        if run.retry_count >= self.settings.max_retries {
            let attempts = run.retry_count;
            error!(
                "Encoder for stream {} failed after {} restart(s), giving up: {}",
                stream_id, attempts, error
            );
            if let Err(e) = self
                .finish(state, stream_id, StopReason::RetriesExhausted, now)
                .await
            {
                error!("Failed to mark stream {} errored: {}", stream_id, e);
            }
            if let Err(e) = self.streams.record_error(stream_id, error).await {
                warn!("Failed to record error for stream {}: {}", stream_id, e);
            }
            return;
        }

        run.retry_count += 1;
        run.restart_pending = true;
        run.pid = None;
        let attempt = run.retry_count;
        let generation = run.generation;
        let token = run.token.clone();
        let delay = self.settings.restart_backoff.delay_for_attempt(attempt);

        warn!(
            "Restarting encoder for stream {} in {:?} (restart {}/{})",
            stream_id, delay, attempt, self.settings.max_retries
        );
        if let Err(e) = self
            .streams
            .record_retry(stream_id, attempt, Some(error))
            .await
        {
            warn!("Failed to record retry for stream {}: {}", stream_id, e);
        }

        let task = self.schedule_restart(stream_id, generation, delay, token);
        if let Some(run) = state.runs.get_mut(&stream_id) {
            run.task = Some(task);
        }
    }

    /// Launch a replacement encoder for the time left in the run
    async fn relaunch(&self, stream_id: Uuid, generation: u64) {
        let mut state = self.state.lock().await;
        let token = match state.runs.get(&stream_id) {
            Some(run) if run.generation == generation && run.restart_pending => run.token.clone(),
            _ => return,
        };

        let now = self.clock.now();
        let Some(info) = state.durations.get(&stream_id).copied() else {
            return;
        };

        // Restarts consume the original window, never a fresh one
        if info.is_expired_at(now) {
            info!(
                "Stream {} reached its duration while waiting to restart",
                stream_id
            );
            if let Err(e) = self
                .finish(&mut state, stream_id, StopReason::DurationComplete, now)
                .await
            {
                error!("Failed to complete stream {}: {}", stream_id, e);
            }
            return;
        }

        let stream = match self.streams.find_by_id(stream_id).await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                warn!("Stream {} disappeared before restart", stream_id);
                if let Err(e) = self
                    .finish(&mut state, stream_id, StopReason::Manual, now)
                    .await
                {
                    error!("Failed to release stream {}: {}", stream_id, e);
                }
                return;
            }
            Err(e) => {
                self.on_failure(&mut state, stream_id, now, e.to_string())
                    .await;
                return;
            }
        };

        let remaining = info.remaining_at(now);
        let invocation = invocation_for(&stream, remaining);
        match self.launcher.launch(stream_id, &invocation).await {
            Ok(process) => {
                let pid = process.pid();
                let task = self.spawn_monitor(stream_id, generation, process, token);
                if let Some(run) = state.runs.get_mut(&stream_id) {
                    run.pid = pid;
                    run.restart_pending = false;
                    run.task = Some(task);
                }
                info!(
                    "Restarted encoder for stream {} with {}s remaining",
                    stream_id,
                    remaining.num_seconds()
                );
            }
            Err(e) => {
                warn!("Failed to restart encoder for stream {}: {}", stream_id, e);
                self.on_failure(
                    &mut state,
                    stream_id,
                    now,
                    format!("failed to restart encoder: {e}"),
                )
                .await;
            }
        }
    }

    fn spawn_monitor(
        &self,
        stream_id: Uuid,
        generation: u64,
        mut process: Box<dyn EncoderProcess>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                exit = process.wait() => Some(exit),
                _ = token.cancelled() => None,
            };

            match exit {
                Some(exit) => supervisor.handle_exit(stream_id, generation, exit).await,
                None => {
                    debug!("Terminating encoder for stream {}", stream_id);
                    if let Err(e) = process
                        .terminate(supervisor.settings.terminate_timeout)
                        .await
                    {
                        warn!("Failed to terminate encoder for stream {}: {}", stream_id, e);
                    }
                }
            }
        })
    }

    fn schedule_restart(
        &self,
        stream_id: Uuid,
        generation: u64,
        delay: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => supervisor.relaunch(stream_id, generation).await,
                _ = token.cancelled() => {
                    debug!("Pending restart for stream {} cancelled", stream_id);
                }
            }
        })
    }

    fn arm_backup_timer(
        &self,
        state: &mut SupervisorState,
        stream_id: Uuid,
        generation: u64,
        expected_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let grace = to_chrono(self.settings.backup_grace);
        let Some(fire_at) = expected_end.checked_add_signed(grace) else {
            warn!(
                "No backup timer for stream {}: end {} is out of range",
                stream_id, expected_end
            );
            return;
        };
        let supervisor = self.clone();
        state
            .backup_timers
            .arm(stream_id, until(now, fire_at), async move {
                if let Err(e) = supervisor
                    .force_stop_run(stream_id, generation, StopReason::BackupTimer)
                    .await
                {
                    error!("Backup timer failed to stop stream {}: {}", stream_id, e);
                }
            });
    }
}

/// Status a stream settles in after leaving `live`
fn status_after(stream: &Stream, reason: StopReason) -> StreamStatus {
    match reason {
        StopReason::Manual => StreamStatus::Offline,
        StopReason::RetriesExhausted => StreamStatus::Errored,
        _ if stream.schedule_type.is_recurring() => StreamStatus::Scheduled,
        _ => StreamStatus::Offline,
    }
}

fn invocation_for(stream: &Stream, remaining: chrono::Duration) -> EncoderInvocation {
    let remaining_ms = remaining.num_milliseconds().max(0) as u64;
    EncoderInvocation {
        input_source: stream.input_source.clone(),
        output_url: stream.output_url.clone(),
        duration_seconds: remaining_ms.div_ceil(1000).max(1),
        loop_input: stream.loop_input,
    }
}
