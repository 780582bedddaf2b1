pub mod build;
pub mod serve;
pub mod version;

use bundlesrv_core::{BundleRegistry, EsbuildBackend, ServerConfig};
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tracing::warn;

/// Registry backed by the configured esbuild executable.
pub fn registry(config: &ServerConfig) -> Result<BundleRegistry> {
    let esbuild = config.resolved_esbuild();
    if which::which(&esbuild).is_err() {
        warn!(esbuild = %esbuild.display(), "Bundler executable not found; builds will fail");
    }
    BundleRegistry::from_config(config, Arc::new(EsbuildBackend::new(esbuild))).into_diagnostic()
}
