use std::env;

use lazy_static::lazy_static;
use slog::{Drain, Level, Logger};

lazy_static! {
    pub static ref LOGGER: Logger = make_logger();
    static ref LOGLEVEL: Level = inner_get_loglevel();
}

fn make_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let filtered_drain = slog::LevelFilter::new(drain, get_loglevel()).fuse();
    Logger::root(filtered_drain, slog::o!())
}

fn inner_get_loglevel() -> Level {
    if env::var("MERKDB_TRACE") == Ok("1".into()) {
        Level::Trace
    } else {
        match env::var("MERKDB_LOG").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warning,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }
}

pub fn get_loglevel() -> Level {
    *LOGLEVEL
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Trace.is_at_least(cur_level) {
            slog::slog_trace!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Debug.is_at_least(cur_level) {
            slog::slog_debug!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Info.is_at_least(cur_level) {
            slog::slog_info!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Warning.is_at_least(cur_level) {
            slog::slog_warn!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ({
        let cur_level = $crate::util::log::get_loglevel();
        if slog::Level::Error.is_at_least(cur_level) {
            slog::slog_error!($crate::util::log::LOGGER, $($arg)*)
        }
    })
}

#[macro_export]
macro_rules! test_debug {
    ($($arg:tt)*) => ({
        #[cfg(test)]
        {
            $crate::debug!($($arg)*)
        }
    })
}
