//! Stable error codes for bundle builds.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions.

/// The bundler executable could not be found or started.
pub const BUNDLE_BACKEND_NOT_FOUND: &str = "BUNDLE_BACKEND_NOT_FOUND";

/// The bundler ran and reported an error (syntax error, unresolved import...).
pub const BUNDLE_FAILED: &str = "BUNDLE_FAILED";

/// I/O failure while staging inputs or collecting outputs.
pub const BUNDLE_IO_ERROR: &str = "BUNDLE_IO_ERROR";

/// The bundler's metafile could not be parsed.
pub const BUNDLE_METAFILE_INVALID: &str = "BUNDLE_METAFILE_INVALID";

/// The build worker panicked or was cancelled.
pub const BUNDLE_WORKER_FAILED: &str = "BUNDLE_WORKER_FAILED";

/// A composition report could not be produced.
pub const BUNDLE_REPORT_FAILED: &str = "BUNDLE_REPORT_FAILED";
