//! Timestamped stdout/stderr logging used by every component.
//!
//! This is the program-facing log, not the `log` crate facade used for our own
//! internal diagnostics (see [`crate::globals::init_logger`]). Every line here
//! is prefixed with a ctime-style local timestamp and flushed immediately,
//! matching the historical behavior supervised programs and operators expect
//! from their stdout/stderr.

use chrono::Local;
use std::io::Write;

fn ctime() -> String {
    Local::now().format("%a %b %e %T %Y").to_string()
}

/// Write a message line to stdout, prefixed with a timestamp, and flush.
pub fn msg(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "[{}] - {}", ctime(), message);
    let _ = stdout.flush();
}

/// Write a message line to stderr, prefixed with a timestamp, and flush.
pub fn err(message: &str) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "[{}] - {}", ctime(), message);
    let _ = stderr.flush();
}

/// Log a normal message, `format!`-style.
#[macro_export]
macro_rules! logmsg {
    ($($arg:tt)*) => {
        $crate::log::msg(&format!($($arg)*))
    };
}

/// Log an error message, `format!`-style.
#[macro_export]
macro_rules! logerr {
    ($($arg:tt)*) => {
        $crate::log::err(&format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctime_has_the_expected_shape() {
        let stamp = ctime();
        // "Mon Jan  1 00:00:00 2026" style: five whitespace-separated fields.
        assert_eq!(stamp.split_whitespace().count(), 5);
    }
}
