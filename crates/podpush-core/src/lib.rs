//! Core domain types and traits for the pod submission pipeline.
//!
//! This crate contains:
//! - Resource identifiers
//! - The submission job record and its step state machine
//! - Collaborator traits for the Git hosting API and the pod registry
//! - Naming rules for branches and destination paths
//! - Parsing of submitted specification documents

pub mod error;
pub mod hosting;
pub mod id;
pub mod job;
pub mod naming;
pub mod registry;
pub mod specification;

pub use error::{Error, Result};
pub use hosting::{HostingClient, HostingError, HostingResult};
pub use id::ResourceId;
pub use job::{JobChange, JobState, LogMessage, Step, SubmissionJob, Transition};
pub use registry::{PodVersionInfo, Registry};
pub use specification::{SpecSource, Specification};
