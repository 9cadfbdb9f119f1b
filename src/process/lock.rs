//! Named filesystem locks: create-exclusive, hold a timestamp,
//! considered stale after a configurable age. Used by both the CLI (wrapping
//! a single user action) and the daemon (briefly, per program, per round) so
//! the two never race on the same program.

use global_placeholders::global;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Maximum age (~30 s) before a held lock is considered abandoned
/// and safe to steal.
const MAX_LOCK_AGE: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct NamedLock {
    path: std::path::PathBuf,
    held: bool,
}

impl NamedLock {
    /// A lock keyed `lock_usrsvc<name>`, e.g. one per program.
    pub fn for_key(name: &str) -> NamedLock {
        let dir = global!("usrsvc.locks");
        NamedLock {
            path: std::path::PathBuf::from(format!("{dir}lock_usrsvc{name}")),
            held: false,
        }
    }

    fn is_stale(&self) -> bool {
        let Ok(meta) = fs::metadata(&self.path) else {
            return true;
        };
        let Ok(modified) = meta.modified() else {
            return true;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > MAX_LOCK_AGE,
            Err(_) => false,
        }
    }

    fn try_create(&self) -> bool {
        if self.is_stale() {
            let _ = fs::remove_file(&self.path);
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let _ = writeln!(file, "{now}");
                true
            }
            Err(_) => false,
        }
    }

    /// Block up to `timeout`, polling for the lock to free up. Returns
    /// `false` (TRY_AGAIN territory) if it never frees within the window.
    pub fn acquire(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if self.try_create() {
                self.held = true;
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Non-blocking attempt, for the daemon's "skip this program this round"
    /// behavior rather than waiting out a CLI action.
    pub fn try_acquire(&mut self) -> bool {
        if self.try_create() {
            self.held = true;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
            self.held = false;
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: &str) -> String {
        format!("test-{tag}-{}", std::process::id())
    }

    #[test]
    fn acquire_then_release_frees_the_lock_for_another_holder() {
        global_placeholders::init!(
            "usrsvc.locks",
            format!("{}/", std::env::temp_dir().display())
        );

        let name = key("basic");
        let mut a = NamedLock::for_key(&name);
        assert!(a.try_acquire());

        let mut b = NamedLock::for_key(&name);
        assert!(!b.try_acquire());

        a.release();
        assert!(b.try_acquire());
        b.release();
    }

    #[test]
    fn a_stale_lock_can_be_stolen() {
        global_placeholders::init!(
            "usrsvc.locks",
            format!("{}/", std::env::temp_dir().display())
        );

        let name = key("stale");
        let lock = NamedLock::for_key(&name);
        fs::write(&lock.path, "0\n").unwrap();
        let stale_time = SystemTime::now() - Duration::from_secs(31);
        let _ = filetime_set(&lock.path, stale_time);

        let mut fresh = NamedLock::for_key(&name);
        assert!(fresh.try_acquire());
        fresh.release();
    }

    fn filetime_set(path: &std::path::Path, time: SystemTime) -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_modified(time)
    }
}
