//! Process-wide startup plumbing: path registry and logger initialization.
//!
//! Mirrors the path-registry idiom used throughout the daemon and CLI: paths
//! are resolved once at startup and retrieved anywhere via `global!(...)`,
//! rather than threaded through every call site.

use global_placeholders::init;
use macros_rs::crashln;
use std::fs;

use crate::helpers;

/// Create `~/.usrsvc/` if missing and register the well-known path placeholders.
///
/// `usrsvc.daemon.pid` and `usrsvc.log` default under the user's home
/// directory; `MainConfig::pidfile` may override the daemon pidfile location,
/// but callers need a location before any config has been parsed (e.g. to
/// decide whether a daemon is already running), hence the default here.
pub fn init() {
    match home::home_dir() {
        Some(path) => {
            let path = path.display().to_string();
            let base = format!("{path}/.usrsvc/");

            if !std::path::Path::new(&base).is_dir() {
                fs::create_dir_all(&base).unwrap_or_else(|err| {
                    crashln!("{} Could not create {base}: {err}", *helpers::FAIL)
                });
            }

            init!("usrsvc.base", base.clone());
            init!("usrsvc.config", format!("{path}/usrsvc.cfg"));
            init!("usrsvc.daemon.pid", format!("{base}daemon.pid"));
            init!("usrsvc.daemon.log", format!("{base}daemon.log"));
            init!("usrsvc.locks", format!("{base}locks/"));

            let locks_dir = format!("{base}locks/");
            if !std::path::Path::new(&locks_dir).is_dir() {
                fs::create_dir_all(&locks_dir).ok();
            }
        }
        None => crashln!("{} Could not determine your home directory", *helpers::FAIL),
    }
}

/// Initialize the `log` crate facade used for internal diagnostics
/// (`-v`/`-vv` verbosity), distinct from the program-facing stdout/stderr
/// logging in [`crate::log`].
pub fn init_logger(verbosity: log::LevelFilter) {
    pretty_env_logger::formatted_builder()
        .filter_level(verbosity)
        .init();
}

/// Redirect the daemon's own logging to a file, for use once daemonized.
pub fn init_daemon_logger(path: &str) {
    simple_logging::log_to_file(path, log::LevelFilter::Info).ok();
}
