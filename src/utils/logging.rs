//! Logging setup for the portfolio pipeline.
//!
//! `MACROBOOK_LOG` overrides the level passed to [`init_logging`] and
//! `MACROBOOK_LOG_STYLE` controls colour (`auto`, `always`, `never`).

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{info, Level, LevelFilter};
use std::io::Write;

const RESET: &str = "\x1b[0m";

fn level_colour(level: Level) -> &'static str {
    match level {
        | Level::Error => "\x1b[31m",
        | Level::Warn => "\x1b[33m",
        | Level::Info => "\x1b[32m",
        | Level::Debug => "\x1b[36m",
        | Level::Trace => "\x1b[35m",
    }
}

/// `macrobook::portfolio::constructor` → `portfolio::constructor`
fn short_target(target: &str) -> &str {
    target.strip_prefix("macrobook::").unwrap_or(target)
}

/// Install the global logger. Calling it again is a no-op.
pub fn init_logging(level: &str) {
    let env = Env::default()
        .filter_or("MACROBOOK_LOG", level)
        .write_style_or("MACROBOOK_LOG_STYLE", "auto");

    Builder::from_env(env)
        .format(|buf, record| {
            let level = record.level();
            writeln!(
                buf,
                "{} {}{:5}{} {:<24} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level_colour(level),
                level,
                RESET,
                short_target(record.target()),
                record.args()
            )
        })
        .target(Target::Stdout)
        .try_init()
        .ok();

    info!("logging at {}", level);
}

/// Debug-level logger captured by the test harness
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).filter_level(LevelFilter::Debug).try_init();
}
