//! Stream lifecycle scenarios: duration enforcement, restarts, backup
//! termination and shutdown, driven through the public supervisor API on
//! paused tokio time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use stream_scheduler::{
    config::TerminationConfig,
    errors::SupervisorError,
    models::{ScheduleType, StopReason, Stream, StreamStatus},
    repositories::{InMemoryStreamRepository, StreamRepository},
    services::{ProcessSupervisor, SupervisorSettings, TerminationSweeper},
    utils::{SharedClock, TokioClock},
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use common::{EncoderScript, ScriptedLauncher, supervisor_settings, utc};

async fn supervisor_with(
    launcher: Arc<ScriptedLauncher>,
    settings: SupervisorSettings,
    stream: Stream,
) -> (ProcessSupervisor, Arc<InMemoryStreamRepository>, SharedClock, uuid::Uuid) {
    let repo = Arc::new(InMemoryStreamRepository::new());
    let stream = repo.save(stream).await.unwrap();
    let clock: SharedClock = TokioClock::starting_at(utc(1, 12, 0, 0));
    let supervisor = ProcessSupervisor::new(repo.clone(), launcher, clock.clone(), settings);
    (supervisor, repo, clock, stream.id)
}

fn five_minute_stream() -> Stream {
    Stream::new("five", "/videos/five.mp4", "rtmp://ingest.example/live2/k", 5)
}

#[tokio::test(start_paused = true)]
async fn test_sweep_stops_stream_that_ignores_its_limit() {
    let launcher = ScriptedLauncher::new([EncoderScript::RunForever]);
    let settings = SupervisorSettings {
        // keep the backup timer out of the way
        backup_grace: Duration::from_secs(3600),
        ..supervisor_settings()
    };
    let (supervisor, repo, clock, id) =
        supervisor_with(launcher, settings, five_minute_stream()).await;

    let start = clock.now();
    supervisor.start(id).await.unwrap();

    let sweeper = TerminationSweeper::new(
        repo.clone(),
        supervisor.clone(),
        clock.clone(),
        &TerminationConfig {
            sweep_interval: Duration::from_secs(30),
            sweep_overdue_grace: Duration::from_secs(60),
            ..TerminationConfig::default()
        },
    );
    let token = CancellationToken::new();
    let sweep_token = token.clone();
    let handle = tokio::spawn(async move { sweeper.run(sweep_token).await });

    sleep(Duration::from_secs(391)).await;

    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Offline);
    assert_eq!(stream.stop_reason, Some(StopReason::OverdueSweep));
    let end = stream.end_time.unwrap();
    assert!(end <= start + chrono::Duration::seconds(390));
    assert!(!supervisor.is_supervised(id).await);

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sweep_and_manual_stop_race_finishes_once() {
    let launcher = ScriptedLauncher::new([EncoderScript::RunForever]);
    let settings = SupervisorSettings {
        backup_grace: Duration::from_secs(3600),
        ..supervisor_settings()
    };
    let (supervisor, repo, clock, id) =
        supervisor_with(launcher, settings, five_minute_stream()).await;
    supervisor.start(id).await.unwrap();

    let sweeper = TerminationSweeper::new(
        repo.clone(),
        supervisor.clone(),
        clock.clone(),
        &TerminationConfig {
            sweep_overdue_grace: Duration::from_secs(60),
            ..TerminationConfig::default()
        },
    );
    sleep(Duration::from_secs(7 * 60)).await;

    let (swept, stopped) = tokio::join!(sweeper.sweep_once(), supervisor.stop(id));
    let stopped = stopped.unwrap();
    assert_eq!(swept.len() + usize::from(stopped), 1);

    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    let winner = if stopped {
        StopReason::Manual
    } else {
        StopReason::OverdueSweep
    };
    assert_eq!(stream.status, StreamStatus::Offline);
    assert_eq!(stream.stop_reason, Some(winner));
    assert_eq!(stream.end_time, Some(clock.now()));
    assert!(!supervisor.is_supervised(id).await);

    sleep(Duration::from_secs(60)).await;
    assert!(sweeper.sweep_once().await.is_empty());
    assert!(!supervisor.stop(id).await.unwrap());
    let after = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(after.end_time, stream.end_time);
    assert_eq!(after.stop_reason, Some(winner));
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_duration_is_never_started_or_swept() {
    let repo = Arc::new(InMemoryStreamRepository::new());
    let clock: SharedClock = TokioClock::starting_at(utc(1, 12, 0, 0));
    let launcher = ScriptedLauncher::new([]);
    let supervisor = ProcessSupervisor::new(
        repo.clone(),
        launcher.clone(),
        clock.clone(),
        supervisor_settings(),
    );

    let endless = repo
        .save(Stream::new("endless", "/v/e.mp4", "rtmp://x/e", 1_000_000_000_000))
        .await
        .unwrap();
    assert!(matches!(
        supervisor.start(endless.id).await,
        Err(SupervisorError::InvalidDuration { .. })
    ));
    assert!(launcher.launches().is_empty());

    let mut stale = Stream::new("stale", "/v/s.mp4", "rtmp://x/s", i64::MAX);
    stale.status = StreamStatus::Live;
    stale.start_time = Some(utc(1, 11, 0, 0));
    let stale = repo.save(stale).await.unwrap();

    let sweeper = TerminationSweeper::new(
        repo.clone(),
        supervisor.clone(),
        clock,
        &TerminationConfig::default(),
    );
    assert!(sweeper.sweep_once().await.is_empty());
    let stored = repo.find_by_id(stale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, StreamStatus::Live);
}

#[tokio::test(start_paused = true)]
async fn test_backup_timer_stops_stream_after_grace() {
    let launcher = ScriptedLauncher::new([EncoderScript::RunForever]);
    let (supervisor, repo, clock, id) =
        supervisor_with(launcher, supervisor_settings(), five_minute_stream()).await;

    let start = clock.now();
    supervisor.start(id).await.unwrap();

    sleep(Duration::from_secs(5 * 60 + 29)).await;
    assert!(supervisor.is_supervised(id).await);

    sleep(Duration::from_secs(2)).await;
    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Offline);
    assert_eq!(stream.stop_reason, Some(StopReason::BackupTimer));
    assert_eq!(
        stream.end_time,
        Some(start + chrono::Duration::seconds(5 * 60 + 30))
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_is_a_no_op() {
    let launcher = ScriptedLauncher::new([]);
    let (supervisor, repo, _clock, id) =
        supervisor_with(launcher, supervisor_settings(), five_minute_stream()).await;

    supervisor.start(id).await.unwrap();
    assert!(supervisor.stop(id).await.unwrap());
    let first = repo.find_by_id(id).await.unwrap().unwrap();

    sleep(Duration::from_secs(10)).await;
    assert!(!supervisor.stop(id).await.unwrap());

    let second = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(second.status, StreamStatus::Offline);
    assert_eq!(second.stop_reason, Some(StopReason::Manual));
    assert_eq!(second.end_time, first.end_time);
    assert!(!supervisor.has_backup_timer(id).await);
}

#[tokio::test(start_paused = true)]
async fn test_clean_exit_at_duration_is_not_restarted() {
    let launcher = ScriptedLauncher::new([EncoderScript::ExitAfter {
        after: Duration::from_secs(5 * 60),
        success: true,
    }]);
    let (supervisor, repo, _clock, id) =
        supervisor_with(launcher.clone(), supervisor_settings(), five_minute_stream()).await;

    supervisor.start(id).await.unwrap();
    sleep(Duration::from_secs(15 * 60)).await;

    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Offline);
    assert_eq!(stream.stop_reason, Some(StopReason::DurationComplete));
    assert_eq!(launcher.launches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restarts_are_bounded() {
    let crash = EncoderScript::ExitAfter {
        after: Duration::from_secs(2),
        success: false,
    };
    let launcher = ScriptedLauncher::new([crash; 10]);
    let (supervisor, repo, _clock, id) = supervisor_with(
        launcher.clone(),
        supervisor_settings(),
        Stream::new("crashy", "/videos/c.mp4", "rtmp://x/k", 60),
    )
    .await;

    supervisor.start(id).await.unwrap();
    sleep(Duration::from_secs(10 * 60)).await;

    // first launch plus max_retries restarts
    assert_eq!(launcher.launches().len(), 4);
    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Errored);
    assert_eq!(stream.stop_reason, Some(StopReason::RetriesExhausted));
    assert!(stream.last_error.is_some());
    assert!(!supervisor.is_supervised(id).await);
}

#[tokio::test(start_paused = true)]
async fn test_restart_only_runs_for_remaining_time() {
    let launcher = ScriptedLauncher::new([EncoderScript::ExitAfter {
        after: Duration::from_secs(120),
        success: false,
    }]);
    let (supervisor, _repo, _clock, id) =
        supervisor_with(launcher.clone(), supervisor_settings(), five_minute_stream()).await;

    supervisor.start(id).await.unwrap();
    sleep(Duration::from_secs(130)).await;

    let launches = launcher.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].1.duration_seconds, 300);
    // crashed at 120s, relaunched after a 5s backoff
    assert_eq!(launches[1].1.duration_seconds, 175);
}

#[tokio::test(start_paused = true)]
async fn test_recurring_stream_returns_to_scheduled() {
    let mut stream = five_minute_stream();
    stream.schedule_type = ScheduleType::Daily;
    stream.recurring_time = chrono::NaiveTime::from_hms_opt(12, 0, 0);
    let (supervisor, repo, _clock, id) =
        supervisor_with(ScriptedLauncher::new([]), supervisor_settings(), stream).await;

    supervisor.start(id).await.unwrap();
    sleep(Duration::from_secs(6 * 60)).await;

    let stream = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Scheduled);
    assert_eq!(stream.stop_reason, Some(StopReason::BackupTimer));
}

#[tokio::test(start_paused = true)]
async fn test_recover_orphans_resumes_remaining_time() {
    let repo = Arc::new(InMemoryStreamRepository::new());
    let clock: SharedClock = TokioClock::starting_at(utc(1, 12, 0, 0));

    let mut running = Stream::new("running", "/v/a.mp4", "rtmp://x/a", 10);
    running.status = StreamStatus::Live;
    running.start_time = Some(utc(1, 11, 56, 0));
    let running = repo.save(running).await.unwrap();

    let mut expired = Stream::new("expired", "/v/b.mp4", "rtmp://x/b", 10);
    expired.status = StreamStatus::Live;
    expired.start_time = Some(utc(1, 11, 0, 0));
    let expired = repo.save(expired).await.unwrap();

    let launcher = ScriptedLauncher::new([]);
    let supervisor =
        ProcessSupervisor::new(repo.clone(), launcher.clone(), clock, supervisor_settings());

    let summary = supervisor.recover_orphans().await.unwrap();
    assert_eq!(summary.resumed, vec![running.id]);
    assert_eq!(summary.completed, vec![expired.id]);

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, running.id);
    assert_eq!(launches[0].1.duration_seconds, 6 * 60);

    let expired = repo.find_by_id(expired.id).await.unwrap().unwrap();
    assert_eq!(expired.status, StreamStatus::Offline);
    assert_eq!(expired.stop_reason, Some(StopReason::DurationComplete));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let repo = Arc::new(InMemoryStreamRepository::new());
    let clock: SharedClock = TokioClock::starting_at(utc(1, 12, 0, 0));
    let supervisor = ProcessSupervisor::new(
        repo.clone(),
        ScriptedLauncher::new([]),
        clock,
        supervisor_settings(),
    );

    let mut ids = Vec::new();
    for n in 0..3 {
        let stream = repo
            .save(Stream::new(format!("s{n}"), "/v/in.mp4", "rtmp://x/k", 30))
            .await
            .unwrap();
        supervisor.start(stream.id).await.unwrap();
        ids.push(stream.id);
    }
    assert_eq!(supervisor.active_streams().await.len(), 3);

    assert_eq!(supervisor.shutdown().await, 3);
    assert!(supervisor.active_streams().await.is_empty());
    for id in ids {
        let stream = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Offline);
        assert_eq!(stream.stop_reason, Some(StopReason::Shutdown));
    }
}
