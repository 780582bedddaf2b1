//! Where finished bundles are written.
//!
//! Each destination is switched independently by configuration. Every write
//! is best effort: failures are logged and never fail the build that
//! produced the bundle.

use crate::backend::BundleOutput;
use crate::config::ServerConfig;
use crate::plan::BundlePlan;
use crate::report::render_report;
use bundlesrv_util::fs::output_file;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Resolved write destinations for one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePolicy {
    /// Persisted bundle location; also where `serve` looks for a previous build.
    pub output_path: PathBuf,
    /// Write to `output_path` after each build.
    pub write_static: bool,
    /// Development copy destination.
    pub dev_copy: Option<PathBuf>,
    /// Composition report destination.
    pub report: Option<PathBuf>,
}

/// What a persist pass actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persisted {
    pub written: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl WritePolicy {
    #[must_use]
    pub fn resolve(file_name: &str, config: &ServerConfig) -> Self {
        Self {
            output_path: config.output_path(file_name),
            write_static: config.write_to_static,
            dev_copy: config
                .dev_write_bundles
                .then(|| config.dev_bundle_path(file_name)),
            report: config
                .dev_write_report
                .then(|| config.report_path(file_name)),
        }
    }

    /// Write a finished bundle to every enabled destination.
    pub fn persist(&self, plan: &BundlePlan, output: &BundleOutput) -> Persisted {
        let mut persisted = Persisted::default();

        if self.write_static {
            write_logged(&self.output_path, &output.code, &mut persisted);
        }

        if let Some(dev_copy) = &self.dev_copy {
            write_logged(dev_copy, &output.code, &mut persisted);
        }

        if let Some(report_path) = &self.report {
            match render_report(plan, output) {
                Ok(html) => {
                    if write_logged(report_path, html.as_bytes(), &mut persisted) {
                        info!(file = %plan.log_name, "wrote report");
                    }
                }
                Err(e) => {
                    error!(
                        file = %report_path.display(),
                        code = e.code,
                        error = %e.message,
                        "error building report"
                    );
                    persisted.failed.push(report_path.clone());
                }
            }
        }

        persisted
    }
}

fn write_logged(path: &Path, bytes: &[u8], persisted: &mut Persisted) -> bool {
    match output_file(path, bytes) {
        Ok(()) => {
            persisted.written.push(path.to_path_buf());
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write bundle");
            persisted.failed.push(path.to_path_buf());
            false
        }
    }
}
