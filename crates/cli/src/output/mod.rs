//! Output formatting
//!
//! Human-readable output goes to stdout with optional colors; `--json`
//! switches every command to a single JSON document on stdout.

mod formatter;

pub use formatter::Formatter;

/// Output settings shared by every command
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub json: bool,
    pub no_color: bool,
    pub quiet: bool,
}
