//! Job records and the result store.
//!
//! - `record` — job state machine and the per-job record
//! - `store` — exclusive owner of all records, with terminal-write
//!   arbitration and garbage collection

pub mod record;
pub mod store;

pub use record::{JobFailure, JobRecord, JobState};
pub use store::ResultStore;
