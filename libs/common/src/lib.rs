//! Shared plumbing for the mbcollect services
//!
//! - logging setup (stderr only, bracketed levels)
//! - signal handling for shutdown and reload
//! - base command-line arguments
//! - figment-based configuration loading
//! - PID file handling

pub mod bootstrap_args;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod pid_file;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use error::{CommonError, Result};
pub use pid_file::PidFile;
pub use shutdown::{wait_for_shutdown, LifecycleSignal, SignalWatcher};
