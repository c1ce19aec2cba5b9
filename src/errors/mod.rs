//! Centralized error handling for the stream scheduler
//!
//! # Error Categories
//!
//! - **Configuration Errors**: unreadable or invalid config files
//! - **Schedule Errors**: definitions rejected at save time, never evaluated
//! - **Broadcast Errors**: classified failures of the broadcast creation API
//! - **Supervisor Errors**: encoder spawn failures and invalid lifecycle requests
//! - **Repository Errors**: persistence collaborator failures

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for Repository Results
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Convenience type alias for Supervisor Results
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Convenience type alias for Broadcast Results
pub type BroadcastResult<T> = Result<T, BroadcastError>;
