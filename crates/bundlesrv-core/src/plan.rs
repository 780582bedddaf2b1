//! Bundle plans: everything a build needs, resolved once per job.
//!
//! Development and diagnostic switches are folded into the plan when the job
//! is constructed, so a build never consults configuration again.

use crate::config::{BundleSpec, ServerConfig, FIELD_TYPES_MODULE, PACKAGES_BUNDLE};
use std::path::PathBuf;

/// What the bundle is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    /// Entry module executed as the bundle's main module.
    Main(String),
    /// Entry module registered in the shared module table under `expose`.
    Exposed { module: String, expose: String },
    /// Every shared package, each registered under its own name.
    Packages(Vec<String>),
}

/// Resolved description of one bundle build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    /// Served file name (`app.js`).
    pub file_name: String,
    /// Short name for log lines (`app`).
    pub log_name: String,
    /// Directory the bundler resolves the entry from.
    pub basedir: PathBuf,
    pub entry: BundleEntry,
    /// Module names left out of the bundle and resolved at runtime.
    pub exclude: Vec<String>,
    /// Run the JSX/ES transform over sources.
    pub transpile: bool,
    /// Embed source maps.
    pub sourcemap: bool,
    /// Reuse the previous output when no input changed.
    pub cache: bool,
    /// Keep absolute module paths in diagnostic output.
    pub full_paths: bool,
}

impl BundlePlan {
    /// Resolve the plan for one configured bundle.
    #[must_use]
    pub fn resolve(spec: &BundleSpec, config: &ServerConfig) -> Self {
        let file_name = spec.file_name();
        let log_name = spec.log_name().to_string();

        let (entry, exclude, transpile) = if is_packages_bundle(&file_name) {
            (BundleEntry::Packages(config.packages.clone()), Vec::new(), false)
        } else {
            let module = relative_module(&spec.file);
            let entry = match &spec.name {
                Some(expose) => BundleEntry::Exposed {
                    module,
                    expose: expose.clone(),
                },
                None => BundleEntry::Main(module),
            };
            let mut exclude = vec![FIELD_TYPES_MODULE.to_string()];
            exclude.extend(config.packages.iter().cloned());
            (entry, exclude, true)
        };

        Self {
            file_name,
            log_name,
            basedir: config.resolved_client_dir(),
            entry,
            exclude,
            transpile,
            sourcemap: config.dev_mode,
            cache: config.dev_mode,
            full_paths: config.dev_write_report,
        }
    }
}

fn is_packages_bundle(file_name: &str) -> bool {
    file_name == PACKAGES_BUNDLE || file_name.ends_with(&format!("/{PACKAGES_BUNDLE}"))
}

/// Entry specifiers are resolved from the base directory, so bare file names
/// get a `./` prefix to keep them from being looked up as packages.
fn relative_module(file: &str) -> String {
    if file.starts_with("./") || file.starts_with("../") || file.starts_with('/') {
        file.to_string()
    } else {
        format!("./{file}")
    }
}
