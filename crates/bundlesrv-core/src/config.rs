//! Server configuration: the config file, bundle entries and the paths
//! derived from them.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the module root when none is given explicitly.
pub const CONFIG_FILE_NAME: &str = "bundlesrv.json";

/// File name of the combined shared-packages bundle.
pub const PACKAGES_BUNDLE: &str = "packages.js";

/// Shared field-types module, never duplicated into ordinary bundles.
pub const FIELD_TYPES_MODULE: &str = "FieldTypes";

/// One configured bundle: an entry module, optionally exposed under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSpec {
    /// Entry module, relative to the client directory (e.g. `./signin`).
    pub file: String,

    /// Name the entry is exposed under in the shared module table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl BundleSpec {
    #[must_use]
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn exposed(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: Some(name.into()),
        }
    }

    /// Name used in log lines: the entry with a leading `./` stripped.
    #[must_use]
    pub fn log_name(&self) -> &str {
        self.file.strip_prefix("./").unwrap_or(&self.file)
    }

    /// File name the bundle is served and persisted under.
    #[must_use]
    pub fn file_name(&self) -> String {
        let name = self.log_name();
        if name.ends_with(".js") {
            name.to_string()
        } else {
            format!("{name}.js")
        }
    }

    /// Parse a `--bundle` flag value: `file` or `file=name`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.split_once('=') {
            Some((file, name)) if !name.is_empty() => Self::exposed(file, name),
            Some((file, _)) => Self::new(file),
            None => Self::new(value),
        }
    }
}

/// Server configuration, resolved once at startup.
///
/// Relative paths are resolved against `module_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Project root. Empty or relative in a config file means "relative to
    /// the file's directory".
    #[serde(default)]
    pub module_root: PathBuf,

    /// Base directory the bundler resolves entries from.
    /// Defaults to `<module_root>/client`.
    pub client_dir: Option<PathBuf>,

    /// Static assets root. Defaults to `<module_root>/public`.
    pub static_root: Option<PathBuf>,

    /// Subdirectory of the static root holding persisted bundles.
    pub static_subdir: String,

    /// Development copy directory. Defaults to `<module_root>/bundles/js`.
    pub dev_bundle_dir: Option<PathBuf>,

    /// Composition report directory. Defaults to `<module_root>/bundles/report`.
    pub report_dir: Option<PathBuf>,

    /// Development mode: source maps, module caching, watching.
    pub dev_mode: bool,

    /// Write a development copy of every bundle.
    pub dev_write_bundles: bool,

    /// Write a composition report next to every development copy.
    pub dev_write_report: bool,

    /// Persist bundles under the static root.
    pub write_to_static: bool,

    /// Shared packages: excluded from ordinary bundles, included in `packages.js`.
    pub packages: Vec<String>,

    /// Configured bundles.
    pub bundles: Vec<BundleSpec>,

    /// Upper bound on how long a deferred request waits for a build.
    /// `None` waits until a build succeeds.
    pub defer_timeout_ms: Option<u64>,

    /// Bundler executable.
    pub esbuild: PathBuf,

    /// Build every bundle at startup instead of on first request.
    pub prebuild: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            module_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            client_dir: None,
            static_root: None,
            static_subdir: "admin".to_string(),
            dev_bundle_dir: None,
            report_dir: None,
            dev_mode: false,
            dev_write_bundles: false,
            dev_write_report: false,
            write_to_static: false,
            packages: Vec::new(),
            bundles: Vec::new(),
            defer_timeout_ms: None,
            esbuild: PathBuf::from("esbuild"),
            prebuild: false,
        }
    }
}

impl ServerConfig {
    /// Create a config rooted at the given module root.
    #[must_use]
    pub fn new(module_root: PathBuf) -> Self {
        Self {
            module_root,
            ..Default::default()
        }
    }

    /// Load a JSON config file. A relative `module_root` inside the file is
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or(Path::new("."));
        if config.module_root.is_relative() {
            config.module_root = base.join(&config.module_root);
        }
        Ok(config)
    }

    /// Load `bundlesrv.json` from `module_root` if present, else defaults.
    pub fn discover(module_root: &Path) -> Result<Self, Error> {
        let candidate = module_root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::new(module_root.to_path_buf()))
        }
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_write_to_static(mut self, write: bool) -> Self {
        self.write_to_static = write;
        self
    }

    #[must_use]
    pub fn with_dev_write_bundles(mut self, write: bool) -> Self {
        self.dev_write_bundles = write;
        self
    }

    #[must_use]
    pub fn with_dev_write_report(mut self, write: bool) -> Self {
        self.dev_write_report = write;
        self
    }

    #[must_use]
    pub fn with_static_root(mut self, root: PathBuf) -> Self {
        self.static_root = Some(root);
        self
    }

    #[must_use]
    pub fn with_client_dir(mut self, dir: PathBuf) -> Self {
        self.client_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: BundleSpec) -> Self {
        self.bundles.push(bundle);
        self
    }

    #[must_use]
    pub fn with_defer_timeout(mut self, timeout: Duration) -> Self {
        self.defer_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_esbuild(mut self, esbuild: PathBuf) -> Self {
        self.esbuild = esbuild;
        self
    }

    fn rooted(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.module_root.join(path)
        }
    }

    #[must_use]
    pub fn resolved_client_dir(&self) -> PathBuf {
        self.client_dir
            .as_deref()
            .map_or_else(|| self.module_root.join("client"), |p| self.rooted(p))
    }

    #[must_use]
    pub fn resolved_static_root(&self) -> PathBuf {
        self.static_root
            .as_deref()
            .map_or_else(|| self.module_root.join("public"), |p| self.rooted(p))
    }

    /// Where a bundle is persisted and read back from.
    #[must_use]
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.resolved_static_root()
            .join(&self.static_subdir)
            .join(file_name)
    }

    #[must_use]
    pub fn dev_bundle_path(&self, file_name: &str) -> PathBuf {
        self.dev_bundle_dir
            .as_deref()
            .map_or_else(|| self.module_root.join("bundles").join("js"), |p| self.rooted(p))
            .join(file_name)
    }

    /// Report file for a bundle: `<report dir>/<stem>.html`.
    #[must_use]
    pub fn report_path(&self, file_name: &str) -> PathBuf {
        let stem = file_name.strip_suffix(".js").unwrap_or(file_name);
        self.report_dir
            .as_deref()
            .map_or_else(
                || self.module_root.join("bundles").join("report"),
                |p| self.rooted(p),
            )
            .join(format!("{stem}.html"))
    }

    /// Bundler executable. Bare names are looked up on `PATH`; relative
    /// paths are resolved against the module root.
    #[must_use]
    pub fn resolved_esbuild(&self) -> PathBuf {
        if self.esbuild.components().count() > 1 {
            self.rooted(&self.esbuild)
        } else {
            self.esbuild.clone()
        }
    }

    #[must_use]
    pub fn defer_timeout(&self) -> Option<Duration> {
        self.defer_timeout_ms.map(Duration::from_millis)
    }
}
