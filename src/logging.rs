//! Logging configuration and initialization
//!
//! Only the binary installs a subscriber; the library just emits `tracing` events.

use tracing::{debug, trace};

/// Filter directive for a verbosity count, falling back to `default_level` at zero.
pub fn log_level(verbose: u8, default_level: &str) -> String {
    match verbose {
        0 => default_level.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Initialize tracing/logging for the command-line front end
pub fn init_logging(verbose: u8, default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level(verbose, default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(verbose >= 3) // Show line numbers for -vvv
        .try_init();

    debug!("safeprune started with verbosity level: {}", verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_verbosity() {
        assert_eq!(log_level(0, "warn"), "warn");
        assert_eq!(log_level(1, "warn"), "debug");
        assert_eq!(log_level(3, "warn"), "trace");
    }
}
