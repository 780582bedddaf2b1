//! `bundlesrv build`: build every configured bundle once and exit.

use bundlesrv_core::{BuildOutcome, BundleRegistry, ServerConfig};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing::info;

/// Build action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub config: ServerConfig,
}

/// One line of the build summary.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct BuildResult {
    file: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(action: BuildAction, json: bool) -> Result<()> {
    // A one-shot build always persists to the static output
    let config = action.config.with_write_to_static(true);
    let registry = super::registry(&config)?;

    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    let results = rt.block_on(build_all(&registry));
    let failed = results.iter().filter(|r| !r.ok).count();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).into_diagnostic()?
        );
    } else {
        for result in &results {
            match (&result.fingerprint, &result.error) {
                (Some(fingerprint), _) => {
                    println!("  {} {} ({} bytes)", result.file, fingerprint, result.size);
                }
                (None, error) => {
                    println!(
                        "  {} FAILED: {}",
                        result.file,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    info!(built = results.len() - failed, failed, "Build finished");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn build_all(registry: &BundleRegistry) -> Vec<BuildResult> {
    registry
        .build_all()
        .await
        .into_iter()
        .map(|(file, outcome)| match outcome {
            BuildOutcome::Built {
                fingerprint, size, ..
            } => BuildResult {
                file,
                ok: true,
                fingerprint: Some(fingerprint),
                size,
                error: None,
            },
            BuildOutcome::Failed(e) => BuildResult {
                file,
                ok: false,
                fingerprint: None,
                size: 0,
                error: Some(e.to_string()),
            },
        })
        .collect()
}
