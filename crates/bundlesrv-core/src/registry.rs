//! All configured bundle jobs, keyed by served file name.

use crate::backend::BundleBackend;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::job::{BuildOutcome, BundleJob, JobStatus};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bundle jobs owned by the server.
#[derive(Debug, Default)]
pub struct BundleRegistry {
    jobs: BTreeMap<String, Arc<BundleJob>>,
}

impl BundleRegistry {
    /// Create one job per configured bundle.
    ///
    /// # Errors
    /// Fails on an empty entry or when two bundles resolve to the same file
    /// name.
    pub fn from_config(config: &ServerConfig, backend: Arc<dyn BundleBackend>) -> Result<Self> {
        let mut jobs = BTreeMap::new();

        for spec in &config.bundles {
            if spec.log_name().trim().is_empty() {
                return Err(Error::EmptyEntry);
            }
            let file = spec.file_name();
            if jobs.contains_key(&file) {
                return Err(Error::DuplicateBundle { file });
            }
            debug!(file = %file, backend = backend.name(), "Registering bundle");
            jobs.insert(file, BundleJob::from_config(spec, config, Arc::clone(&backend)));
        }

        Ok(Self { jobs })
    }

    /// Job serving `file` (e.g. `signin.js`).
    #[must_use]
    pub fn get(&self, file: &str) -> Option<&Arc<BundleJob>> {
        self.jobs.get(file)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BundleJob>> {
        self.jobs.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs.values().map(|job| job.status()).collect()
    }

    /// Build every bundle and wait for all of them. Jobs already building
    /// are skipped.
    pub async fn build_all(&self) -> Vec<(String, BuildOutcome)> {
        let handles: Vec<_> = self
            .jobs
            .iter()
            .filter_map(|(file, job)| job.build().map(|handle| (file.clone(), handle)))
            .collect();

        let results = join_all(
            handles
                .into_iter()
                .map(|(file, handle)| async move { (file, handle.await) }),
        )
        .await;

        results
            .into_iter()
            .filter_map(|(file, result)| match result {
                Ok(outcome) => Some((file, outcome)),
                Err(e) => {
                    warn!(file = %file, error = %e, "Build task failed");
                    None
                }
            })
            .collect()
    }
}
