//! Command-line arguments shared by every service
//!
//! Flattened into each service's own clap parser.

use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Log level or filter directives (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,

    /// Verbose output (forces debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            no_color: false,
            verbose: false,
        }
    }
}

impl ServiceArgs {
    /// Filter directives handed to the logging setup
    pub fn log_directives(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Install logging according to these arguments
    pub fn init_logging(&self) -> crate::Result<()> {
        crate::logging::init(self.log_directives(), self.no_color)
    }
}
