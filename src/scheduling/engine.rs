//! Recurring schedule engine
//!
//! One cooperative tick evaluates every enabled definition concurrently. For
//! each one, [`decide`] looks at the trigger window, the occurrence dedup,
//! the cooldown and the missed-window catch-up, all as pure logic. A firing
//! then re-reads the definition from the repository, creates the broadcast
//! with bounded retries, records the run and hands a new stream to the
//! supervisor.
//!
//! The same tick also starts `scheduled` streams whose own window is open.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{AppResult, BroadcastError, RepositoryError, ScheduleConfigError};
use crate::models::{BroadcastRequest, ScheduleDefinition, ScheduleType, Stream, StreamStatus};
use crate::repositories::{ScheduleRepository, StreamRepository};
use crate::scheduling::window::{
    TriggerWindow, already_ran, next_occurrence, occurrence_in_window, once_in_window,
};
use crate::services::BroadcastCreator;
use crate::services::encoder_command::ingest_url;
use crate::services::process_supervisor::ProcessSupervisor;
use crate::utils::SharedClock;
use crate::utils::retry::{RetryConfig, with_retry};
use crate::utils::time::{format_for_display, to_chrono};

/// Window, cooldown and catch-up bounds used by [`decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub window: TriggerWindow,
    /// Minimum time between two firings of one definition
    pub cooldown: Duration,
    /// Missed occurrences older than this are skipped
    pub catch_up_horizon: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: std::time::Duration,
    pub policy: SchedulePolicy,
    pub creation_retry: RetryConfig,
    /// Ingest base the created stream key is appended to
    pub output_base_url: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.scheduler.tick_interval,
            policy: SchedulePolicy {
                window: TriggerWindow::new(
                    to_chrono(config.scheduler.early_window),
                    to_chrono(config.scheduler.late_window),
                ),
                cooldown: to_chrono(config.scheduler.cooldown),
                catch_up_horizon: to_chrono(config.scheduler.catch_up_horizon),
            },
            creation_retry: config.scheduler.creation_retry(),
            output_base_url: config.encoder.output_base_url.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No window open and no missed occurrence
    NotDue,
    /// A run was already recorded for this occurrence
    AlreadyRan,
    /// `next_run_at` already points past this occurrence
    Consumed,
    Cooldown,
    /// Another creation for the definition is in progress
    InFlight,
    /// Disabled or deleted between the decision and the re-read
    NoLongerEnabled,
}

/// What to do with a definition at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fire {
        occurrence: DateTime<Utc>,
        catch_up: bool,
    },
    /// Move `next_run_at` forward without firing
    Reschedule { next_run_at: DateTime<Utc> },
    Skip(SkipReason),
}

/// Decide whether `definition` fires at `now`
pub fn decide(
    definition: &ScheduleDefinition,
    now: DateTime<Utc>,
    tz: &Tz,
    policy: &SchedulePolicy,
) -> Decision {
    let cooling = definition
        .last_run_at
        .is_some_and(|last| now - last < policy.cooldown);

    if let Some(occurrence) = occurrence_in_window(
        &definition.pattern,
        definition.time_of_day,
        tz,
        now,
        &policy.window,
    ) {
        if already_ran(definition.last_run_at, occurrence, &policy.window) {
            return Decision::Skip(SkipReason::AlreadyRan);
        }
        if definition.next_run_at.is_some_and(|next| next > occurrence) {
            return Decision::Skip(SkipReason::Consumed);
        }
        if cooling {
            return Decision::Skip(SkipReason::Cooldown);
        }
        return Decision::Fire {
            occurrence,
            catch_up: false,
        };
    }

    let Some(next) = definition.next_run_at else {
        return Decision::Skip(SkipReason::NotDue);
    };
    if next > now {
        return Decision::Skip(SkipReason::NotDue);
    }

    // The window for `next` closed without a firing
    let missed_by = now - next;
    if missed_by <= policy.catch_up_horizon
        && !already_ran(definition.last_run_at, next, &policy.window)
    {
        if cooling {
            return Decision::Skip(SkipReason::Cooldown);
        }
        return Decision::Fire {
            occurrence: next,
            catch_up: true,
        };
    }

    match next_occurrence(&definition.pattern, definition.time_of_day, tz, now) {
        Some(next_run_at) => Decision::Reschedule { next_run_at },
        None => Decision::Skip(SkipReason::NotDue),
    }
}

/// Result of evaluating one definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Fired {
        stream_id: Uuid,
        broadcast_id: String,
    },
    /// Creation failed; `last_run_at` is unchanged
    Failed(BroadcastError),
    Rescheduled(DateTime<Utc>),
    Skipped(SkipReason),
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Definitions that fired
    pub fired: Vec<Uuid>,
    /// Definitions whose creation failed
    pub failed: Vec<Uuid>,
    /// Definitions whose evaluation errored
    pub errored: Vec<Uuid>,
    /// Scheduled streams started
    pub streams_started: Vec<Uuid>,
}

impl TickSummary {
    pub fn is_quiet(&self) -> bool {
        self.fired.is_empty()
            && self.failed.is_empty()
            && self.errored.is_empty()
            && self.streams_started.is_empty()
    }
}

/// Removes the definition from the in-flight set when dropped
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<Uuid>>>, id: Uuid) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
        inserted.then(|| Self {
            set: set.clone(),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

#[derive(Clone)]
pub struct RecurringScheduleEngine {
    schedules: Arc<dyn ScheduleRepository>,
    streams: Arc<dyn StreamRepository>,
    creator: Arc<dyn BroadcastCreator>,
    supervisor: ProcessSupervisor,
    clock: SharedClock,
    timezone: Tz,
    settings: Arc<EngineSettings>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl RecurringScheduleEngine {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        streams: Arc<dyn StreamRepository>,
        creator: Arc<dyn BroadcastCreator>,
        supervisor: ProcessSupervisor,
        clock: SharedClock,
        timezone: Tz,
        settings: EngineSettings,
    ) -> Self {
        Self {
            schedules,
            streams,
            creator,
            supervisor,
            clock,
            timezone,
            settings: Arc::new(settings),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Tick until cancelled. The first tick runs immediately so windows
    /// missed while the service was down are caught up.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(
            "Starting recurring schedule engine (tick {:?}, timezone {})",
            self.settings.tick_interval,
            self.timezone.name()
        );

        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    if !summary.is_quiet() {
                        info!(
                            "Schedule tick: {} fired, {} failed, {} errored, {} stream(s) started",
                            summary.fired.len(),
                            summary.failed.len(),
                            summary.errored.len(),
                            summary.streams_started.len()
                        );
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Schedule engine received cancellation signal, shutting down");
                    break;
                }
            }
        }

        info!("Recurring schedule engine stopped");
    }

    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        self.evaluate_at(now).await
    }

    /// Evaluate every enabled definition and every scheduled stream at `now`.
    /// Failures are isolated per item.
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> TickSummary {
        trace!(
            "Evaluating schedules at {}",
            format_for_display(now, &self.timezone)
        );
        let mut summary = TickSummary::default();

        match self.schedules.find_enabled().await {
            Ok(definitions) => {
                let results = join_all(definitions.into_iter().map(|definition| async move {
                    let id = definition.id;
                    let name = definition.name.clone();
                    (id, name, self.evaluate_definition(definition, now).await)
                }))
                .await;

                for (id, name, result) in results {
                    match result {
                        Ok(Outcome::Fired { .. }) => summary.fired.push(id),
                        Ok(Outcome::Failed(_)) => summary.failed.push(id),
                        Ok(Outcome::Rescheduled(next)) => debug!(
                            "Schedule '{}' rescheduled to {}",
                            name,
                            format_for_display(next, &self.timezone)
                        ),
                        Ok(Outcome::Skipped(reason)) => {
                            trace!("Schedule '{}' skipped: {:?}", name, reason)
                        }
                        Err(e) => {
                            warn!("Failed to evaluate schedule '{}' ({}): {}", name, id, e);
                            summary.errored.push(id);
                        }
                    }
                }
            }
            Err(e) => error!("Failed to fetch enabled schedules: {}", e),
        }

        summary.streams_started = self.start_due_streams(now).await;
        summary
    }

    async fn evaluate_definition(
        &self,
        mut definition: ScheduleDefinition,
        now: DateTime<Utc>,
    ) -> AppResult<Outcome> {
        if definition.next_run_at.is_none() {
            // Start from the earliest occurrence whose window is still open
            let from = now - self.settings.policy.window.late;
            if let Some(next) = next_occurrence(
                &definition.pattern,
                definition.time_of_day,
                &self.timezone,
                from,
            ) {
                self.schedules.set_next_run(definition.id, next).await?;
                debug!(
                    "Schedule '{}' first run at {}",
                    definition.name,
                    format_for_display(next, &self.timezone)
                );
                definition.next_run_at = Some(next);
            }
        }

        match decide(&definition, now, &self.timezone, &self.settings.policy) {
            Decision::Fire {
                occurrence,
                catch_up,
            } => self.fire(&definition, occurrence, catch_up, now).await,
            Decision::Reschedule { next_run_at } => {
                warn!(
                    "Schedule '{}' missed its run at {:?}, next run {}",
                    definition.name,
                    definition.next_run_at,
                    format_for_display(next_run_at, &self.timezone)
                );
                self.schedules
                    .set_next_run(definition.id, next_run_at)
                    .await?;
                Ok(Outcome::Rescheduled(next_run_at))
            }
            Decision::Skip(reason) => Ok(Outcome::Skipped(reason)),
        }
    }

    async fn fire(
        &self,
        definition: &ScheduleDefinition,
        occurrence: DateTime<Utc>,
        catch_up: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Outcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, definition.id) else {
            debug!("Schedule '{}' already has a creation in flight", definition.name);
            return Ok(Outcome::Skipped(SkipReason::InFlight));
        };

        // Authoritative re-read right before the side effect
        let Some(current) = self.schedules.find_by_id(definition.id).await? else {
            return Ok(Outcome::Skipped(SkipReason::NoLongerEnabled));
        };
        if !current.enabled {
            return Ok(Outcome::Skipped(SkipReason::NoLongerEnabled));
        }
        let policy = &self.settings.policy;
        if already_ran(current.last_run_at, occurrence, &policy.window) {
            debug!(
                "Schedule '{}' already ran for {}",
                current.name,
                format_for_display(occurrence, &self.timezone)
            );
            return Ok(Outcome::Skipped(SkipReason::AlreadyRan));
        }
        if current
            .last_run_at
            .is_some_and(|last| now - last < policy.cooldown)
        {
            return Ok(Outcome::Skipped(SkipReason::Cooldown));
        }

        info!(
            "Schedule '{}' ({}) firing for {}{}",
            current.name,
            current.pattern.as_str(),
            format_for_display(occurrence, &self.timezone),
            if catch_up { " (catch-up)" } else { "" }
        );

        let request =
            BroadcastRequest::from_template(&current.template, current.id, occurrence.max(now));
        let creator = &self.creator;
        let request_ref = &request;
        let created = with_retry(
            &self.settings.creation_retry,
            |attempt| async move {
                debug!(
                    "Creating broadcast for schedule {} (attempt {})",
                    request_ref.schedule_definition_id, attempt
                );
                creator.create(request_ref).await
            },
            "broadcast creation",
        )
        .await;

        let created = match created {
            Ok(created) => created,
            Err(e) => return self.record_failure(&current, occurrence, e).await,
        };

        let next_run_at = next_occurrence(
            &current.pattern,
            current.time_of_day,
            &self.timezone,
            occurrence.max(now),
        )
        .ok_or(ScheduleConfigError::EmptyWeeklyDays)?;
        self.schedules
            .update_run(current.id, now, next_run_at)
            .await?;

        let stream = self.stream_for(
            &current,
            occurrence,
            &created.stream_key,
            &created.broadcast_id,
        );
        let stream = self.streams.save(stream).await?;
        info!(
            "Schedule '{}' created broadcast {} as stream {}, next run {}",
            current.name,
            created.broadcast_id,
            stream.id,
            format_for_display(next_run_at, &self.timezone)
        );

        // The run is recorded either way; a failed start is visible on the stream
        if let Err(e) = self.supervisor.start(stream.id).await {
            error!(
                "Schedule '{}' could not start stream {}: {}",
                current.name, stream.id, e
            );
        }

        Ok(Outcome::Fired {
            stream_id: stream.id,
            broadcast_id: created.broadcast_id,
        })
    }

    async fn record_failure(
        &self,
        definition: &ScheduleDefinition,
        occurrence: DateTime<Utc>,
        error: BroadcastError,
    ) -> AppResult<Outcome> {
        error!(
            "Broadcast creation for schedule '{}' failed ({}): {}",
            definition.name,
            error.kind(),
            error
        );
        self.schedules
            .record_error(definition.id, Some(format!("{}: {}", error.kind(), error)))
            .await?;

        // Fatal errors give up on this occurrence; transient ones may be
        // retried by a later tick while the window or catch-up allows
        if !matches!(error, BroadcastError::TransientNetwork(_))
            && let Some(next) = next_occurrence(
                &definition.pattern,
                definition.time_of_day,
                &self.timezone,
                occurrence,
            )
        {
            self.schedules.set_next_run(definition.id, next).await?;
        }

        Ok(Outcome::Failed(error))
    }

    fn stream_for(
        &self,
        definition: &ScheduleDefinition,
        occurrence: DateTime<Utc>,
        stream_key: &str,
        broadcast_id: &str,
    ) -> Stream {
        let template = &definition.template;
        let mut stream = Stream::new(
            template.title.clone(),
            template.input_source.clone(),
            ingest_url(&self.settings.output_base_url, stream_key),
            template.duration_minutes,
        );
        stream.loop_input = template.loop_input;
        stream.schedule_type = ScheduleType::Once;
        stream.schedule_time = Some(occurrence);
        stream.broadcast_id = Some(broadcast_id.to_string());
        stream.schedule_definition_id = Some(definition.id);
        stream
    }

    /// Start `scheduled` streams whose window is open at `now`
    async fn start_due_streams(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let scheduled = match self.streams.find_by_status(StreamStatus::Scheduled).await {
            Ok(streams) => streams,
            Err(e) => {
                error!("Failed to fetch scheduled streams: {}", e);
                return Vec::new();
            }
        };

        let mut started = Vec::new();
        for stream in scheduled {
            if !stream_is_due(&stream, now, &self.timezone, &self.settings.policy) {
                continue;
            }

            info!(
                "Scheduled stream {} ('{}', {}) is due",
                stream.id,
                stream.title,
                stream.schedule_type.as_str()
            );
            match self.supervisor.start(stream.id).await {
                Ok(_) => started.push(stream.id),
                Err(e) => warn!("Failed to start scheduled stream {}: {}", stream.id, e),
            }
        }
        started
    }

    /// Enable or disable a definition. Pattern, time, days and run timestamps
    /// are preserved; re-enabling recomputes `next_run_at` only if it is in the past.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> AppResult<ScheduleDefinition> {
        let definition = self
            .schedules
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("schedule definition", id))?;

        self.schedules.set_enabled(id, enabled).await?;

        if enabled {
            let now = self.clock.now();
            let needs_recompute = definition.next_run_at.is_none_or(|next| next <= now);
            if needs_recompute
                && let Some(next) = next_occurrence(
                    &definition.pattern,
                    definition.time_of_day,
                    &self.timezone,
                    now,
                )
            {
                self.schedules.set_next_run(id, next).await?;
            }
        }

        info!(
            "Schedule '{}' {}",
            definition.name,
            if enabled { "enabled" } else { "disabled" }
        );

        self.schedules
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("schedule definition", id).into())
    }
}

/// Whether a `scheduled` stream should go live at `now`
pub fn stream_is_due(
    stream: &Stream,
    now: DateTime<Utc>,
    tz: &Tz,
    policy: &SchedulePolicy,
) -> bool {
    if stream.status != StreamStatus::Scheduled {
        return false;
    }

    if stream.schedule_type == ScheduleType::Once {
        return stream
            .schedule_time
            .is_some_and(|at| once_in_window(at, now, &policy.window));
    }

    let Some((pattern, time_of_day)) = stream.recurrence() else {
        return false;
    };
    let Some(occurrence) = occurrence_in_window(&pattern, time_of_day, tz, now, &policy.window)
    else {
        return false;
    };

    !already_ran(stream.start_time, occurrence, &policy.window)
        && !stream
            .start_time
            .is_some_and(|started| now - started < policy.cooldown)
}
