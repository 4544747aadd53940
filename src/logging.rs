//! Log verbosity control and the logger installed for C callers.
//!
//! The crate only emits records through the `log` macros. Rust users bring their own backend;
//! the C entry points install an `env_logger` backend printing `[PCM LEVEL] message` lines.

use crate::config::LogLevel;
use log::info;
use std::io::Write;

/// Change the verbosity of the records emitted by this crate.
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.to_level_filter());
    info!("Log level set to {}", level as i32);
}

/// Install the `[PCM LEVEL] message` logger on stdout, then apply `level`.
///
/// Does nothing but adjust the level when a logger is already installed.
pub fn init_logger(level: LogLevel) {
    let installed = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .target(env_logger::Target::Stdout)
        .format(|buf, record| writeln!(buf, "{}", render(record.level(), record.args())))
        .try_init()
        .is_ok();
    log::set_max_level(level.to_level_filter());
    if installed {
        info!("Logger installed at level {}", level);
    }
}

fn render(level: log::Level, args: &std::fmt::Arguments) -> String {
    format!("[PCM {}] {}", level, args)
}
