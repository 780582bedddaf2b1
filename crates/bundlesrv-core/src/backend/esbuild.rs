//! Backend driving the `esbuild` executable.
//!
//! The entry is fed through stdin as a small generated module that registers
//! exposed modules in a shared module table (`globalThis.__bundlesrvModules`)
//! and installs a `require` shim, so excluded names resolve at runtime to
//! whatever the packages bundle registered.

use super::{BundleBackend, BundleError, BundleOutput, InputModule};
use crate::codes;
use crate::plan::{BundleEntry, BundlePlan};
use bundlesrv_util::hash::blake3_files;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::debug;

const ENTRY_PRELUDE: &str = r#"var __modules = globalThis.__bundlesrvModules || (globalThis.__bundlesrvModules = {});
if (typeof globalThis.require !== "function") {
  globalThis.require = function (id) {
    if (Object.prototype.hasOwnProperty.call(__modules, id)) return __modules[id];
    throw new Error("Cannot find module '" + id + "'");
  };
}
"#;

/// Metafile input key esbuild uses for the stdin entry.
const STDIN_INPUT: &str = "<stdin>";

/// Last output per bundle, keyed by file name, with a digest of its inputs.
struct Memo {
    inputs_digest: String,
    output: BundleOutput,
}

/// Bundles by running `esbuild` as a child process.
pub struct EsbuildBackend {
    executable: PathBuf,
    memo: Mutex<HashMap<String, Memo>>,
}

impl std::fmt::Debug for EsbuildBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsbuildBackend")
            .field("executable", &self.executable)
            .finish_non_exhaustive()
    }
}

impl EsbuildBackend {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn run(&self, plan: &BundlePlan) -> Result<BundleOutput, BundleError> {
        let workdir = tempfile::tempdir()
            .map_err(|e| BundleError::new(codes::BUNDLE_IO_ERROR, e.to_string()))?;
        let outfile = workdir.path().join("bundle.js");
        let metafile = workdir.path().join("meta.json");

        let mut child = Command::new(&self.executable)
            .args(command_args(plan, &outfile, &metafile))
            .current_dir(&plan.basedir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.executable, &e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(entry_source(plan).as_bytes())
                .map_err(|e| BundleError::new(codes::BUNDLE_IO_ERROR, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BundleError::new(codes::BUNDLE_IO_ERROR, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("esbuild exited with {}", output.status)
            } else {
                stderr
            };
            return Err(BundleError::new(codes::BUNDLE_FAILED, message)
                .with_path(plan.basedir.join(entry_label(plan))));
        }

        let code = std::fs::read(&outfile).map_err(|e| {
            BundleError::new(codes::BUNDLE_IO_ERROR, e.to_string()).with_path(&outfile)
        })?;
        let meta = std::fs::read(&metafile).map_err(|e| {
            BundleError::new(codes::BUNDLE_IO_ERROR, e.to_string()).with_path(&metafile)
        })?;
        let modules = parse_metafile(&meta, &plan.basedir)?;

        Ok(BundleOutput { code, modules })
    }

    /// Previous output for this plan, if none of its inputs changed since.
    fn cached(&self, plan: &BundlePlan) -> Option<BundleOutput> {
        let memo = self.memo.lock().unwrap();
        let entry = memo.get(&plan.file_name)?;
        let digest = blake3_files(entry.output.modules.iter().map(|m| m.path.as_path())).ok()?;
        (digest == entry.inputs_digest).then(|| entry.output.clone())
    }

    fn remember(&self, plan: &BundlePlan, output: &BundleOutput) {
        match blake3_files(output.modules.iter().map(|m| m.path.as_path())) {
            Ok(inputs_digest) => {
                self.memo.lock().unwrap().insert(
                    plan.file_name.clone(),
                    Memo {
                        inputs_digest,
                        output: output.clone(),
                    },
                );
            }
            Err(e) => {
                debug!(file = %plan.file_name, error = %e, "Not caching bundle output");
                self.memo.lock().unwrap().remove(&plan.file_name);
            }
        }
    }
}

impl BundleBackend for EsbuildBackend {
    fn name(&self) -> &'static str {
        "esbuild"
    }

    fn bundle(&self, plan: &BundlePlan) -> Result<BundleOutput, BundleError> {
        if plan.cache {
            if let Some(output) = self.cached(plan) {
                debug!(file = %plan.file_name, "Inputs unchanged, reusing bundle");
                return Ok(output);
            }
        }

        let output = self.run(plan)?;
        if plan.cache {
            self.remember(plan, &output);
        }
        Ok(output)
    }
}

fn spawn_error(executable: &Path, err: &io::Error) -> BundleError {
    let code = if err.kind() == io::ErrorKind::NotFound {
        codes::BUNDLE_BACKEND_NOT_FOUND
    } else {
        codes::BUNDLE_IO_ERROR
    };
    BundleError::new(code, format!("failed to start bundler: {err}")).with_path(executable)
}

/// Command-line arguments for one build.
pub(crate) fn command_args(plan: &BundlePlan, outfile: &Path, metafile: &Path) -> Vec<String> {
    let mut args = vec![
        "--bundle".to_string(),
        "--format=iife".to_string(),
        "--platform=browser".to_string(),
        "--log-level=error".to_string(),
        format!("--sourcefile={}", plan.file_name),
        format!("--outfile={}", outfile.display()),
        format!("--metafile={}", metafile.display()),
    ];
    if plan.transpile {
        args.push("--loader:.js=jsx".to_string());
    }
    if plan.sourcemap {
        args.push("--sourcemap=inline".to_string());
    }
    for name in &plan.exclude {
        args.push(format!("--external:{name}"));
    }
    args
}

/// Generated stdin entry for a plan.
pub(crate) fn entry_source(plan: &BundlePlan) -> String {
    let mut src = String::from(ENTRY_PRELUDE);
    match &plan.entry {
        BundleEntry::Main(module) => {
            let _ = writeln!(src, "require({});", js_string(module));
        }
        BundleEntry::Exposed { module, expose } => {
            let _ = writeln!(
                src,
                "__modules[{}] = require({});",
                js_string(expose),
                js_string(module)
            );
        }
        BundleEntry::Packages(packages) => {
            for package in packages {
                let quoted = js_string(package);
                let _ = writeln!(src, "__modules[{quoted}] = require({quoted});");
            }
        }
    }
    src
}

fn entry_label(plan: &BundlePlan) -> &str {
    match &plan.entry {
        BundleEntry::Main(module) | BundleEntry::Exposed { module, .. } => module,
        BundleEntry::Packages(_) => &plan.file_name,
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[derive(Deserialize)]
struct Metafile {
    #[serde(default)]
    inputs: BTreeMap<String, MetafileInput>,
}

#[derive(Deserialize)]
struct MetafileInput {
    bytes: u64,
}

/// Module list from an esbuild metafile. Input paths are relative to the
/// directory esbuild ran in.
pub(crate) fn parse_metafile(bytes: &[u8], basedir: &Path) -> Result<Vec<InputModule>, BundleError> {
    let meta: Metafile = serde_json::from_slice(bytes)
        .map_err(|e| BundleError::new(codes::BUNDLE_METAFILE_INVALID, e.to_string()))?;

    Ok(meta
        .inputs
        .into_iter()
        .filter(|(path, _)| path != STDIN_INPUT)
        .map(|(path, input)| InputModule {
            path: basedir.join(path),
            bytes: input.bytes,
        })
        .collect())
}
