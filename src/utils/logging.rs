//! Logger setup and per-module switchable log macros.
//!
//! A module opts into the macros by declaring its own switch:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//! ```
//! Flipping the const to `false` silences that module's loop chatter without
//! touching `RUST_LOG`.

use log::LevelFilter;

/// Installs env_logger. `RUST_LOG` still wins per module; `verbose` only
/// raises the default level.
pub fn init(verbose: bool) {
    let level = if verbose || debug_from_env() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // A second init (tests, embedding) is harmless.
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

fn debug_from_env() -> bool {
    std::env::var("THE_LOOP_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}
