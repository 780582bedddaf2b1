#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! On-demand JavaScript bundling for the admin server.
//!
//! Each configured bundle gets a [`BundleJob`] that builds lazily on the
//! first request, answers requests that arrive mid-build once the build
//! lands, and (in development) rebuilds when a dependency changes.

pub mod backend;
pub mod codes;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod persist;
pub mod plan;
pub mod registry;
pub mod report;
pub mod response;
pub mod version;
pub mod watch;

pub use backend::{BundleBackend, BundleError, BundleOutput, EsbuildBackend, InputModule};
pub use config::{BundleSpec, ServerConfig};
pub use error::Error;
pub use job::{BuildOutcome, BundleJob, JobOptions, JobStatus};
pub use plan::{BundleEntry, BundlePlan};
pub use registry::BundleRegistry;
pub use response::{BundleResponse, Payload};
pub use version::VERSION;
