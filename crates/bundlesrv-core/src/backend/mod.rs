//! Bundler backend abstraction.
//!
//! The job layer never talks to a bundler directly. It hands a
//! [`BundlePlan`] to a [`BundleBackend`] on a blocking worker thread and gets
//! back the bundle bytes plus the modules that went into them.
//!
//! ```ignore
//! use bundlesrv_core::backend::{BundleBackend, EsbuildBackend};
//!
//! let backend = EsbuildBackend::new("esbuild");
//! let output = backend.bundle(&plan)?;
//! println!("{} bytes from {} modules", output.code.len(), output.modules.len());
//! ```

pub mod esbuild;

pub use esbuild::EsbuildBackend;

use crate::plan::BundlePlan;
use std::path::PathBuf;

/// Bundler backend trait.
pub trait BundleBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Build one bundle. Called from a blocking worker, never concurrently
    /// for the same plan.
    fn bundle(&self, plan: &BundlePlan) -> Result<BundleOutput, BundleError>;
}

/// A source module that went into a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputModule {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Size of the module as read by the bundler.
    pub bytes: u64,
}

/// Result of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    /// Browser-ready bundle.
    pub code: Vec<u8>,
    /// Modules in the bundle, i.e. its dependency graph.
    pub modules: Vec<InputModule>,
}

impl BundleOutput {
    #[must_use]
    pub fn new(code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: code.into(),
            modules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, path: impl Into<PathBuf>, bytes: u64) -> Self {
        self.modules.push(InputModule {
            path: path.into(),
            bytes,
        });
        self
    }

    #[must_use]
    pub fn total_input_bytes(&self) -> u64 {
        self.modules.iter().map(|m| m.bytes).sum()
    }
}

/// Build failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleError {
    pub code: &'static str,
    pub message: String,
    pub path: Option<PathBuf>,
}

impl BundleError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: {} ({})", self.code, self.message, path.display())
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for BundleError {}
