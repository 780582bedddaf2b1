#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use bundlesrv_core::{BundleSpec, ServerConfig};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bundlesrv")]
#[command(author, version, about = "On-demand JavaScript bundles for the admin UI", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Serve bundles over HTTP, building each on first request
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1", env = "BUNDLESRV_HOST")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 3000, env = "BUNDLESRV_PORT")]
        port: u16,

        /// Build every bundle at startup instead of on first request
        #[arg(long)]
        prebuild: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Build every configured bundle once and write it to the static output
    Build {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// Flags shared by commands that load a server configuration. Flags override
/// values from the config file.
#[derive(clap::Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Config file (defaults to bundlesrv.json in the module root)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Project root
    #[arg(long, value_name = "PATH")]
    module_root: Option<PathBuf>,

    /// Static assets root (defaults to <module root>/public)
    #[arg(long, value_name = "PATH")]
    static_root: Option<PathBuf>,

    /// Development mode: source maps, module caching, rebuild on change
    #[arg(long, env = "BUNDLESRV_DEV")]
    dev: bool,

    /// Write a development copy of every bundle
    #[arg(long, env = "BUNDLESRV_WRITE_BUNDLES")]
    write_bundles: bool,

    /// Write a composition report for every bundle
    #[arg(long, env = "BUNDLESRV_WRITE_REPORT")]
    write_report: bool,

    /// Persist bundles under the static root
    #[arg(long, env = "BUNDLESRV_WRITE_STATIC")]
    write_static: bool,

    /// Bundle entry, optionally exposed under a name (`./admin` or `./fields=FieldTypes`)
    #[arg(long = "bundle", value_name = "ENTRY")]
    bundles: Vec<String>,

    /// Shared package, excluded from ordinary bundles and built into packages.js
    #[arg(long = "package", value_name = "NAME")]
    packages: Vec<String>,

    /// Bundler executable
    #[arg(long, value_name = "PATH", env = "BUNDLESRV_ESBUILD")]
    esbuild: Option<PathBuf>,

    /// Give up on requests waiting for a build after this many milliseconds
    #[arg(long, value_name = "MS")]
    defer_timeout_ms: Option<u64>,
}

impl ConfigArgs {
    /// Load the config file (explicit or discovered) and apply flags on top.
    fn resolve(&self, cwd: &Path) -> Result<ServerConfig> {
        let module_root = self.module_root.as_ref().map(|root| absolute(cwd, root));

        let mut config = match &self.config {
            Some(path) => ServerConfig::load(&absolute(cwd, path)).into_diagnostic()?,
            None => ServerConfig::discover(module_root.as_deref().unwrap_or(cwd)).into_diagnostic()?,
        };

        if let Some(root) = module_root {
            config.module_root = root;
        }
        if let Some(root) = &self.static_root {
            config = config.with_static_root(absolute(cwd, root));
        }
        if let Some(esbuild) = &self.esbuild {
            config = config.with_esbuild(esbuild.clone());
        }
        if let Some(ms) = self.defer_timeout_ms {
            config = config.with_defer_timeout(Duration::from_millis(ms));
        }

        config.dev_mode |= self.dev;
        config.dev_write_bundles |= self.write_bundles;
        config.dev_write_report |= self.write_report;
        config.write_to_static |= self.write_static;

        for package in &self.packages {
            if !config.packages.contains(package) {
                config.packages.push(package.clone());
            }
        }
        for bundle in &self.bundles {
            config = config.with_bundle(BundleSpec::parse(bundle));
        }

        Ok(config)
    }
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Serve {
            host,
            port,
            prebuild,
            config,
        }) => {
            let span = tracing::info_span!("serve", cmd = "serve", cwd = %cwd.display());
            let _guard = span.enter();

            let mut config = config.resolve(&cwd)?;
            config.prebuild |= prebuild;
            let action = commands::serve::ServeAction { config, host, port };

            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::serve::run(action))
        }
        Some(Commands::Build { config }) => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();

            let action = commands::build::BuildAction {
                config: config.resolve(&cwd)?,
            };
            commands::build::run(action, cli.json)
        }
    }
}
