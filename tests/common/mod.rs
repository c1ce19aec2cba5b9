//! Shared fixtures for the integration tests: scripted encoder and broadcast
//! collaborators plus builders for the supervisor and engine.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use uuid::Uuid;

use stream_scheduler::{
    errors::{BroadcastError, BroadcastResult},
    models::{
        BroadcastCreated, BroadcastRequest, BroadcastTemplate, ScheduleDefinition, SchedulePattern,
    },
    repositories::{InMemoryScheduleRepository, InMemoryStreamRepository},
    scheduling::{EngineSettings, RecurringScheduleEngine, SchedulePolicy, TriggerWindow},
    services::{
        BroadcastCreator, EncoderExit, EncoderInvocation, EncoderLauncher, EncoderProcess,
        ProcessSupervisor, SupervisorSettings,
    },
    utils::{RetryConfig, SharedClock},
};

pub fn utc(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, second)
        .unwrap()
}

/// How a launched encoder behaves
#[derive(Debug, Clone, Copy)]
pub enum EncoderScript {
    /// Runs until terminated, ignoring its own duration limit
    RunForever,
    /// Exits on its own after the given time
    ExitAfter { after: Duration, success: bool },
}

struct ScriptedProcess {
    exit_at: Option<Instant>,
    success: bool,
}

#[async_trait]
impl EncoderProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(1000)
    }

    async fn wait(&mut self) -> io::Result<EncoderExit> {
        match self.exit_at {
            Some(at) => sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
        Ok(EncoderExit {
            code: Some(if self.success { 0 } else { 1 }),
            success: self.success,
            last_error: (!self.success).then(|| "Broken pipe".to_string()),
        })
    }

    async fn terminate(&mut self, _grace: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Launcher that plays back scripts in order, then runs forever
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<EncoderScript>>,
    launches: Mutex<Vec<(Uuid, EncoderInvocation)>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: impl IntoIterator<Item = EncoderScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            launches: Mutex::new(Vec::new()),
        })
    }

    pub fn launches(&self) -> Vec<(Uuid, EncoderInvocation)> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EncoderLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        stream_id: Uuid,
        invocation: &EncoderInvocation,
    ) -> io::Result<Box<dyn EncoderProcess>> {
        self.launches
            .lock()
            .unwrap()
            .push((stream_id, invocation.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(EncoderScript::RunForever);

        let (exit_at, success) = match script {
            EncoderScript::RunForever => (None, true),
            EncoderScript::ExitAfter { after, success } => (Some(Instant::now() + after), success),
        };
        Ok(Box::new(ScriptedProcess { exit_at, success }))
    }
}

/// Broadcast creator answering from a queue of results, succeeding once it runs dry
#[derive(Default)]
pub struct ScriptedCreator {
    responses: Mutex<VecDeque<Result<(), BroadcastError>>>,
    requests: Mutex<Vec<BroadcastRequest>>,
}

impl ScriptedCreator {
    pub fn new(responses: impl IntoIterator<Item = Result<(), BroadcastError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<BroadcastRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BroadcastCreator for ScriptedCreator {
    async fn create(&self, request: &BroadcastRequest) -> BroadcastResult<BroadcastCreated> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        match self.responses.lock().unwrap().pop_front() {
            Some(Err(e)) => Err(e),
            _ => Ok(BroadcastCreated {
                broadcast_id: format!("bc-{call}"),
                stream_key: format!("key-{call}"),
            }),
        }
    }
}

pub fn supervisor_settings() -> SupervisorSettings {
    SupervisorSettings {
        max_retries: 3,
        restart_backoff: RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        terminate_timeout: Duration::from_secs(5),
        backup_grace: Duration::from_secs(30),
        ending_soon_threshold: Duration::from_secs(300),
    }
}

pub fn engine_settings() -> EngineSettings {
    EngineSettings {
        tick_interval: Duration::from_secs(120),
        policy: SchedulePolicy {
            window: TriggerWindow::new(chrono::Duration::minutes(2), chrono::Duration::minutes(5)),
            cooldown: chrono::Duration::minutes(10),
            catch_up_horizon: chrono::Duration::minutes(60),
        },
        creation_retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        output_base_url: "rtmp://ingest.example/live2".to_string(),
    }
}

pub fn template() -> BroadcastTemplate {
    BroadcastTemplate {
        title: "Morning show".to_string(),
        description: Some("Daily loop".to_string()),
        privacy_status: "unlisted".to_string(),
        input_source: "/videos/morning.mp4".to_string(),
        duration_minutes: 30,
        loop_input: true,
    }
}

pub fn daily_at(hour: u32, minute: u32) -> ScheduleDefinition {
    ScheduleDefinition::new(
        "morning",
        SchedulePattern::Daily,
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
        template(),
    )
    .unwrap()
}

/// Everything an engine scenario needs, wired against in-memory repositories
pub struct EngineHarness {
    pub engine: RecurringScheduleEngine,
    pub supervisor: ProcessSupervisor,
    pub schedules: Arc<InMemoryScheduleRepository>,
    pub streams: Arc<InMemoryStreamRepository>,
    pub creator: Arc<ScriptedCreator>,
    pub launcher: Arc<ScriptedLauncher>,
}

impl EngineHarness {
    pub fn new(creator: Arc<ScriptedCreator>, clock: SharedClock) -> Self {
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let streams = Arc::new(InMemoryStreamRepository::new());
        let launcher = ScriptedLauncher::new([]);
        let supervisor = ProcessSupervisor::new(
            streams.clone(),
            launcher.clone(),
            clock.clone(),
            supervisor_settings(),
        );
        let engine = RecurringScheduleEngine::new(
            schedules.clone(),
            streams.clone(),
            creator.clone(),
            supervisor.clone(),
            clock,
            Tz::UTC,
            engine_settings(),
        );

        Self {
            engine,
            supervisor,
            schedules,
            streams,
            creator,
            launcher,
        }
    }
}
