//! Stream lifecycle services
//!
//! Leaf first: duration bookkeeping, encoder command and process handling,
//! the supervisor that owns running encoders, the backup termination
//! mechanisms, and the broadcast creation collaborator.

pub mod broadcast_creator;
pub mod duration_tracker;
pub mod encoder_command;
pub mod encoder_process;
pub mod process_supervisor;
pub mod termination;

pub use broadcast_creator::{BroadcastCreator, HttpBroadcastCreator};
pub use duration_tracker::{DurationInfo, DurationTracker};
pub use encoder_command::{EncoderCommandBuilder, EncoderInvocation};
pub use encoder_process::{EncoderExit, EncoderLauncher, EncoderProcess, FfmpegLauncher};
pub use process_supervisor::{
    ActiveStreamInfo, ProcessSupervisor, RecoverySummary, SupervisorSettings,
};
pub use termination::{BackupTimers, TerminationSweeper};
