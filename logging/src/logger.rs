// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use chrono::Local;
use colored::{Color, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// A `log::Log` implementation that writes timestamped, level-colored lines to stderr.
pub struct EngineLogger {
    level: LevelFilter,
}

impl EngineLogger {
    pub fn new(level: LevelFilter) -> EngineLogger {
        EngineLogger { level }
    }

    fn color_for(level: Level) -> Color {
        match level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Blue,
            Level::Trace => Color::Magenta,
        }
    }
}

impl Log for EngineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level().to_string().color(Self::color_for(record.level()));
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        eprintln!(
            "{timestamp} {level} {target}] {args}",
            target = record.target(),
            args = record.args(),
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_level_filter() {
        let logger = EngineLogger::new(LevelFilter::Warn);
        assert!(logger.enabled(&Metadata::builder().level(Level::Error).build()));
        assert!(logger.enabled(&Metadata::builder().level(Level::Warn).build()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Info).build()));
    }
}
