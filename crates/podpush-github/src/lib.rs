//! GitHub implementation of the hosting client.
//!
//! Talks to the git data and pulls endpoints of the REST API for a single
//! index repository, and checks that a submitted pod's source is public.

pub mod client;
pub mod source;

pub use client::GitHubClient;
pub use source::SourceCheck;
