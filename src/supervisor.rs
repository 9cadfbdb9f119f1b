//! The supervision loop: the daemon. Iterates programs every round,
//! autostarts what isn't running, runs monitors on what is, and applies the
//! restart-policy budget.

use crate::codes::ReturnCode;
use crate::config::{self, ConfigSet, ProgramConfig};
use crate::monitor;
use crate::process::lifecycle;
use crate::process::lock::NamedLock;
use crate::process::{self, identity};
use crate::{logerr, logmsg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static SHOULD_STOP: AtomicBool = AtomicBool::new(false);

/// Registered once at daemon startup; flips the flag checked between rounds.
/// Supervised programs are not touched.
pub extern "C" fn request_shutdown(_: libc::c_int) {
    SHOULD_STOP.store(true, Ordering::SeqCst);
}

fn shutdown_requested() -> bool {
    SHOULD_STOP.load(Ordering::SeqCst)
}

const ROUND_INTERVAL: Duration = Duration::from_secs(1);
/// The daemon only waits a short, non-blocking-ish window for a
/// program's lock before skipping it this round — a CLI action in flight
/// wins.
const DAEMON_LOCK_WAIT: Duration = Duration::from_millis(50);

/// Per-program in-memory restart budget. Never persisted: a daemon
/// restart resets every program's budget.
#[derive(Default)]
struct ProgramState {
    attempts: u32,
    cooldown_until: Option<Instant>,
    was_running_last_round: bool,
    exhausted_logged: bool,
}

pub struct Supervisor {
    main_path: std::path::PathBuf,
    states: HashMap<String, ProgramState>,
    last_good: Option<ConfigSet>,
}

impl Supervisor {
    pub fn new(main_path: std::path::PathBuf) -> Supervisor {
        Supervisor {
            main_path,
            states: HashMap::new(),
            last_good: None,
        }
    }

    fn state_for(&mut self, name: &str) -> &mut ProgramState {
        self.states.entry(name.to_string()).or_default()
    }

    /// Acquire the daemon's own pidfile; refuse to start a second instance.
    ///
    /// Atomic create with O_EXCL-like semantics — `create_new` is the
    /// exclusivity check itself, not merely the write. Reading and checking
    /// liveness first only decides whether a *stale* file should be removed
    /// before the exclusive create is attempted; the create is what actually
    /// rules out a second instance racing us.
    pub fn claim_daemon_pidfile(pidfile: &str) -> Result<(), ReturnCode> {
        if let Ok(existing) = std::fs::read_to_string(pidfile) {
            if let Ok(pid) = existing.trim().parse::<i32>() {
                if process::pid_alive(pid) {
                    return Err(ReturnCode::UsrsvcdAlreadyRunning);
                }
            }
            logmsg!("removing stale daemon pidfile at {pidfile}");
            let _ = std::fs::remove_file(pidfile);
        }

        use std::fs::OpenOptions;
        use std::io::Write;

        match OpenOptions::new().write(true).create_new(true).open(pidfile) {
            Ok(mut file) => writeln!(file, "{}", std::process::id()).map_err(|err| {
                logerr!("failed to write daemon pidfile {pidfile}: {err}");
                ReturnCode::InsufficientPermissions
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                logerr!("another instance claimed {pidfile} first");
                Err(ReturnCode::UsrsvcdAlreadyRunning)
            }
            Err(err) => {
                logerr!("failed to create daemon pidfile {pidfile}: {err}");
                Err(ReturnCode::InsufficientPermissions)
            }
        }
    }

    pub fn release_daemon_pidfile(pidfile: &str) {
        let _ = std::fs::remove_file(pidfile);
    }

    /// Runs until SIGTERM/SIGINT flips [`SHOULD_STOP`] between rounds.
    pub fn run(&mut self) {
        loop {
            if shutdown_requested() {
                logmsg!("shutdown requested, exiting supervision loop");
                break;
            }

            match config::loader::load(&self.main_path) {
                Ok(set) => {
                    self.last_good = Some(set);
                }
                Err(err) => {
                    eprintln!(
                        "{} config reload failed, keeping previous snapshot: {err}",
                        *crate::helpers::WARN
                    );
                    logerr!("config reload failed, keeping previous snapshot: {err}");
                }
            }

            if let Some(set) = self.last_good.take() {
                self.run_round(&set);
                self.last_good = Some(set);
            }

            std::thread::sleep(ROUND_INTERVAL);
        }
    }

    fn run_round(&mut self, set: &ConfigSet) {
        for cfg in set.enabled_programs() {
            let mut lock = NamedLock::for_key(&cfg.name);
            if !lock.acquire(DAEMON_LOCK_WAIT) {
                if crate::debug::is_debug_enabled() {
                    logmsg!("{}: lock busy, skipping this round", cfg.name);
                }
                continue;
            }
            self.run_program_round(cfg);
            lock.release();
        }
    }

    fn run_program_round(&mut self, cfg: &ProgramConfig) {
        match identity::get_running_program(cfg) {
            None => self.handle_not_running(cfg),
            Some(program) => self.handle_running(cfg, program),
        }
    }

    fn handle_not_running(&mut self, cfg: &ProgramConfig) {
        let state = self.state_for(&cfg.name);
        state.was_running_last_round = false;

        if !cfg.autostart {
            return;
        }

        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                return;
            }
        }

        if cfg.maxrestarts > 0 && state.attempts >= cfg.maxrestarts {
            if !state.exhausted_logged {
                logerr!(
                    "program {} has exhausted its restart budget ({} attempts); leaving it stopped",
                    cfg.name,
                    cfg.maxrestarts
                );
                state.exhausted_logged = true;
            }
            return;
        }

        state.attempts += 1;
        let attempts = state.attempts;
        let (code, pid) = lifecycle::start(cfg);

        let state = self.state_for(&cfg.name);
        if code.is_success() {
            logmsg!("autostarted {} (pid {:?}, attempt {attempts})", cfg.name, pid);
        } else {
            logerr!("autostart of {} failed: {code} (attempt {attempts})", cfg.name);
            state.cooldown_until = Some(Instant::now() + Duration::from_secs(cfg.restart_delay));
        }
    }

    fn handle_running(&mut self, cfg: &ProgramConfig, program: identity::Program) {
        let recovered = {
            let state = self.state_for(&cfg.name);
            let recovered = state.was_running_last_round;
            state.was_running_last_round = true;
            recovered
        };
        if recovered {
            let state = self.state_for(&cfg.name);
            state.attempts = 0;
            state.exhausted_logged = false;
            state.cooldown_until = None;
        }

        if !cfg.monitoring.is_active() {
            return;
        }

        let runtime = running_seconds(&program).unwrap_or(0);
        if runtime < cfg.monitoring.monitor_after {
            return;
        }

        let monitors = monitor::from_config(&cfg.monitoring);
        let report = monitor::execute_list(&monitors, &program);
        if !report.do_restart {
            return;
        }

        logmsg!(
            "monitor {:?} triggered a restart for {} (ran {} check(s) in {:?})",
            report.triggered,
            cfg.name,
            report.num_ran,
            report.runtime
        );

        let state = self.state_for(&cfg.name);
        if cfg.maxrestarts > 0 && state.attempts >= cfg.maxrestarts {
            if !state.exhausted_logged {
                logerr!(
                    "program {} has exhausted its restart budget; monitor-triggered restart skipped",
                    cfg.name
                );
                state.exhausted_logged = true;
            }
            return;
        }
        state.attempts += 1;

        let outcome = lifecycle::stop(cfg);
        logmsg!("{}: stop before monitor restart -> {outcome:?}", cfg.name);
        let (code, _pid) = lifecycle::start(cfg);
        if code != ReturnCode::Success {
            logerr!("monitor-triggered restart of {} failed: {code}", cfg.name);
        }
    }
}

/// Approximate runtime via `/proc/<pid>` mtime (the kernel updates it when
/// the process directory's contents change very rarely — this is a
/// best-effort uptime signal used only to gate monitor suppression).
fn running_seconds(program: &identity::Program) -> Option<u64> {
    let meta = std::fs::metadata(format!("/proc/{}", program.pid)).ok()?;
    let modified = meta.modified().ok()?;
    std::time::SystemTime::now()
        .duration_since(modified)
        .ok()
        .map(|d| d.as_secs())
}

