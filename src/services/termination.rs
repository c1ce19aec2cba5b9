//! Backup termination mechanisms
//!
//! The encoder's own `-t` limit is the primary cutoff. Two independent backups
//! sit on top of it:
//!
//! - a one-shot [`BackupTimers`] entry per run, firing a grace period after the
//!   expected end and cancelled by every legitimate stop
//! - a periodic [`TerminationSweeper`] that scans all `live` streams and
//!   force-stops anything overdue, including streams left behind by a crashed
//!   or restarted service
//!
//! Both go through the supervisor's idempotent stop, so overlapping triggers
//! collapse into a single state change.

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::TerminationConfig;
use crate::models::{StopReason, StreamStatus};
use crate::repositories::StreamRepository;
use crate::services::process_supervisor::ProcessSupervisor;
use crate::utils::SharedClock;
use crate::utils::time::to_chrono;

/// One-shot force-stop timers keyed by stream id
#[derive(Debug, Default)]
pub struct BackupTimers {
    timers: HashMap<Uuid, CancellationToken>,
}

impl BackupTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` after `delay` unless cancelled first. Re-arming a stream
    /// cancels its previous timer.
    pub fn arm<F>(&mut self, stream_id: Uuid, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel(&stream_id);

        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => on_fire.await,
                _ = cancelled.cancelled() => {
                    trace!("Backup timer for stream {} cancelled", stream_id);
                }
            }
        });

        debug!("Armed backup timer for stream {} in {:?}", stream_id, delay);
        self.timers.insert(stream_id, token);
    }

    /// Cancel a pending timer; returns whether one was armed
    pub fn cancel(&mut self, stream_id: &Uuid) -> bool {
        match self.timers.remove(stream_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, token) in self.timers.drain() {
            token.cancel();
        }
    }

    pub fn is_armed(&self, stream_id: &Uuid) -> bool {
        self.timers.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Periodic scan for live streams that outlived their duration
pub struct TerminationSweeper {
    streams: Arc<dyn StreamRepository>,
    supervisor: ProcessSupervisor,
    clock: SharedClock,
    interval: Duration,
    overdue_grace: ChronoDuration,
}

impl TerminationSweeper {
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        supervisor: ProcessSupervisor,
        clock: SharedClock,
        config: &TerminationConfig,
    ) -> Self {
        Self {
            streams,
            supervisor,
            clock,
            interval: config.sweep_interval,
            overdue_grace: to_chrono(config.sweep_overdue_grace),
        }
    }

    /// Run the sweep loop until cancelled
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(
            "Starting termination sweep every {:?} (overdue grace {}s)",
            self.interval,
            self.overdue_grace.num_seconds()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stopped = self.sweep_once().await;
                    if !stopped.is_empty() {
                        warn!("Termination sweep force-stopped {} stream(s)", stopped.len());
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Termination sweep received cancellation signal, shutting down");
                    break;
                }
            }
        }
    }

    /// Force-stop every live stream past its expected end by more than the
    /// grace period. Returns the ids that were stopped.
    pub async fn sweep_once(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        let live = match self.streams.find_by_status(StreamStatus::Live).await {
            Ok(streams) => streams,
            Err(e) => {
                error!("Termination sweep could not list live streams: {}", e);
                return Vec::new();
            }
        };

        trace!("Termination sweep checking {} live stream(s)", live.len());
        let mut stopped = Vec::new();

        for stream in live {
            // Prefer the in-memory entry; fall back to persisted fields for
            // streams this process is not supervising
            let expected_end = match self.supervisor.expected_end(stream.id).await {
                Some(end) => end,
                None => match stream.expected_end() {
                    Some(end) => end,
                    None => {
                        warn!(
                            "Live stream {} ('{}') has no computable end, cannot check expiry",
                            stream.id, stream.title
                        );
                        continue;
                    }
                },
            };

            let overdue = now - expected_end;
            if overdue <= self.overdue_grace {
                continue;
            }

            warn!(
                "Stream {} ('{}') is {}s past its expected end {}, force-stopping",
                stream.id,
                stream.title,
                overdue.num_seconds(),
                expected_end
            );

            match self
                .supervisor
                .stop_with_reason(stream.id, StopReason::OverdueSweep)
                .await
            {
                Ok(true) => {
                    let note = format!(
                        "force-stopped {}s after expected end",
                        overdue.num_seconds()
                    );
                    if let Err(e) = self.streams.record_error(stream.id, note).await {
                        warn!("Failed to record sweep warning for stream {}: {}", stream.id, e);
                    }
                    stopped.push(stream.id);
                }
                Ok(false) => debug!("Stream {} was stopped concurrently", stream.id),
                Err(e) => error!("Failed to force-stop stream {}: {}", stream.id, e),
            }
        }

        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = BackupTimers::new();
        let id = Uuid::new_v4();

        let counter = fired.clone();
        timers.arm(id, Duration::from_secs(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = BackupTimers::new();
        let id = Uuid::new_v4();

        let counter = fired.clone();
        timers.arm(id, Duration::from_secs(30), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel(&id));
        assert!(!timers.cancel(&id));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = BackupTimers::new();
        let id = Uuid::new_v4();

        for _ in 0..2 {
            let counter = fired.clone();
            timers.arm(id, Duration::from_secs(10), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(timers.len(), 1);
        sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
