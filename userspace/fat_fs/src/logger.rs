use core::fmt::Display;
use std::io::{IsTerminal, Write};

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

struct Inner {
    colored: bool,
}

impl Inner {
    fn write_with_color(&mut self, out: &mut impl Write, color: Color, string: impl Display) {
        let string: &dyn Display = match (self.colored, color) {
            (false, _) | (_, Color::Default) => &string,
            (_, Color::Gray) => &string.dimmed(),
            (_, Color::BrightRed) => &string.bright_red(),
            (_, Color::BrightYellow) => &string.bright_yellow(),
            (_, Color::BrightBlue) => &string.bright_blue(),
            (_, Color::BrightCyan) => &string.bright_cyan(),
            (_, Color::BrightMagenta) => &string.bright_magenta(),
        };
        // Nowhere left to report a failed write to stderr.
        let _ = write!(out, "{string}");
    }
}

struct StderrLogger {
    inner: spin::Mutex<Inner>,
}

static LOGGER: StderrLogger = StderrLogger {
    inner: spin::Mutex::new(Inner { colored: false }),
};

impl Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut inner = self.inner.lock();
        let mut out = std::io::stderr().lock();
        let level = record.level();
        inner.write_with_color(
            &mut out,
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        inner.write_with_color(&mut out, Color::Gray, format_args!("[{}] ", record.target()));
        inner.write_with_color(&mut out, Color::Default, record.args());
        inner.write_with_color(&mut out, Color::Default, "\n");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the stderr logger. Level tags are coloured when stderr is a terminal.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    LOGGER.inner.lock().colored = std::io::stderr().is_terminal();
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

/// `FAT_FS_LOG` names a level (`error` through `trace`, or `off`).
pub fn level_from_env(default: LevelFilter) -> LevelFilter {
    std::env::var("FAT_FS_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
