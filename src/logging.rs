//! Diagnostic logging on stderr through `log` + `env_logger`.
//!
//! `-v` raises the default level; `DEADLINES_LOG` (env_logger filter syntax)
//! overrides it entirely. Messages use `area.event key=value` text.

use log::LevelFilter;

pub const LOG_ENV: &str = "DEADLINES_LOG";

pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Safe to call more than once; later calls are ignored.
pub fn init(verbose: u8) {
    let default_filter = level_for_verbosity(verbose).to_string().to_lowercase();
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or(LOG_ENV, default_filter)
            .write_style("DEADLINES_LOG_STYLE"),
    )
    .format_timestamp_secs()
    .try_init();
}
