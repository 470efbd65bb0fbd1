//! Stderr logger for the tracker crates.
//!
//! Lines look like `[  0.512s DEBUG charuco::resolver] message`: time since
//! installation, level, and the emitting module with the `board_tracker_`
//! prefix dropped. Records from other crates pass only at `Warn` and above.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "board_tracker";

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

fn short_target(target: &str) -> &str {
    target
        .strip_prefix("board_tracker_")
        .or_else(|| target.strip_prefix("board_tracker::"))
        .unwrap_or(target)
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.target().starts_with(OWN_PREFIX) {
            metadata.level() <= self.level
        } else {
            metadata.level() <= Level::Warn
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut out = std::io::stderr().lock();
        let _ = writeln!(
            out,
            "[{:8.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            short_target(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StderrLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level.max(LevelFilter::Warn));
    Ok(())
}

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
///
/// Spans close with their busy time, so each pipeline stage of a frame is
/// timed.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_lose_the_crate_prefix() {
        assert_eq!(short_target("board_tracker_charuco::resolver"), "charuco::resolver");
        assert_eq!(short_target("board_tracker::session"), "session");
        assert_eq!(short_target("image::codecs"), "image::codecs");
    }

    #[test]
    fn install_errors_propagate_as_boxed_errors() {
        fn install() -> Result<(), Box<dyn std::error::Error>> {
            init_with_level(LevelFilter::Info)?;
            init_with_level(LevelFilter::Debug)?;
            Ok(())
        }
        assert!(install().is_ok());
    }

    #[test]
    fn foreign_targets_are_limited_to_warnings() {
        let logger = StderrLogger {
            level: LevelFilter::Debug,
            started: Instant::now(),
        };
        let meta = |target, level| Metadata::builder().target(target).level(level).build();
        assert!(logger.enabled(&meta("board_tracker_pose::solver", Level::Debug)));
        assert!(!logger.enabled(&meta("board_tracker_pose::solver", Level::Trace)));
        assert!(!logger.enabled(&meta("png::decoder", Level::Info)));
        assert!(logger.enabled(&meta("png::decoder", Level::Warn)));
    }
}
