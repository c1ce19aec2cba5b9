/// Configuration default values
///
/// Every empirically tuned window, grace period and retry bound lives here so
/// it can be changed in one place and overridden from the config file.
use std::time::Duration;

// Scheduling timezone
pub const DEFAULT_TIMEZONE: &str = "UTC";

// Encoder defaults
pub const DEFAULT_ENCODER_COMMAND: &str = "ffmpeg";
pub const DEFAULT_OUTPUT_BASE_URL: &str = "rtmp://a.rtmp.youtube.com/live2";
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

// Supervisor defaults
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RESTART_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RESTART_BACKOFF_MAX: Duration = Duration::from_secs(60);
pub const DEFAULT_RESTART_BACKOFF_MULTIPLIER: f64 = 2.0;

// Termination defaults
pub const DEFAULT_BACKUP_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_OVERDUE_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_ENDING_SOON_THRESHOLD: Duration = Duration::from_secs(5 * 60);

// Recurring schedule defaults
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_EARLY_WINDOW: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_LATE_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CATCH_UP_HORIZON: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CREATION_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_CREATION_BACKOFF_INITIAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CREATION_BACKOFF_MAX: Duration = Duration::from_secs(30);

// Broadcast API defaults
pub const DEFAULT_BROADCAST_ENDPOINT: &str = "http://127.0.0.1:8090/api/broadcasts";
pub const DEFAULT_BROADCAST_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
