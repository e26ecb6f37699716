//! Repository traits and implementations.

pub mod job;
pub mod logs;
pub mod memory;
pub mod pod;

pub use job::{JobClaim, JobStore, PgJobClaim, PgJobStore, SubmissionJobRecord};
pub use logs::LogRecord;
pub use memory::{MemoryJobClaim, MemoryJobStore, MemoryRegistry};
pub use pod::PgRegistry;
