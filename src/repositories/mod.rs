//! Repository pattern abstraction over stream and schedule persistence
//!
//! The supervisor and the engine only talk to the traits in [`traits`]; any
//! store (SQL, remote API) can be plugged in. [`memory`] provides the
//! in-process implementation used by the binary and the tests.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryScheduleRepository, InMemoryStreamRepository};
pub use traits::{ScheduleRepository, StreamRepository};
