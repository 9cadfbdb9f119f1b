//! Action coordination: per-program named mutual exclusion plus
//! serial/parallel fan-out for `start|stop|restart|status all`.
//!
//! Mirrors the original client's `doAction`/`doActionParallel` split: a
//! single action is always taken under the program's named lock, `all` is
//! either a plain loop (serial) or one child process per program
//! (`--parallel`), using a parallel-process model rather than a cooperative
//! one — fan-out uses real child processes via `fork(2)`, not threads.

use crate::codes::{self, ReturnCode};
use crate::config::{ConfigSet, ProgramConfig};
use crate::process::lifecycle;
use crate::process::{identity, lock::NamedLock};
use crate::{logerr, logmsg};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{ForkResult, fork};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Status,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "restart" => Some(Action::Restart),
            "status" => Some(Action::Status),
            _ => None,
        }
    }
}

/// Installs SIG_IGN on SIGTERM/SIGINT for the duration of a user
/// action, so a signal sent mid-dispatch cannot leave a program half
/// started. The CLI calls this once before any dispatch; it is never
/// un-done because the process exits right after.
pub fn ignore_term_and_int() {
    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::SigIgn);
        let _ = signal::signal(Signal::SIGINT, SigHandler::SigIgn);
    }
}

/// Perform `action` on a single program, under its named lock. `31` seconds
/// matches the original `NamedAtomicLock(..., maxLockAge=30).acquire(31)`:
/// wait one second longer than the staleness window before giving up.
pub fn perform(action: Action, cfg: &ProgramConfig) -> ReturnCode {
    if !cfg.enabled && action != Action::Status {
        logerr!(
            "program {} is currently disabled in config; only `status` is supported",
            cfg.name
        );
        return ReturnCode::ProgramDisabled;
    }

    if crate::debug::is_debug_enabled() {
        logmsg!("acquiring lock for {} ({})", cfg.name, action.as_str());
    }

    let mut lock = NamedLock::for_key(&cfg.name);
    if !lock.acquire(Duration::from_secs(31)) {
        logerr!(
            "cannot acquire lock for {}. Is something else looping trying to access it? Try the command again.",
            cfg.name
        );
        return ReturnCode::TryAgain;
    }

    let result = perform_locked(action, cfg);
    lock.release();
    result
}

fn perform_locked(action: Action, cfg: &ProgramConfig) -> ReturnCode {
    match action {
        Action::Start => {
            if let Some(existing) = identity::get_running_program(cfg) {
                logmsg!("program {} is already running (pid {})", cfg.name, existing.pid);
                return ReturnCode::Success;
            }
            let (code, _pid) = lifecycle::start(cfg);
            if code.is_success() {
                logmsg!("started {}", cfg.name);
            } else {
                logerr!("failed to start {}: {code}", cfg.name);
            }
            code
        }
        Action::Stop => {
            match identity::get_running_program(cfg) {
                Some(program) => {
                    logmsg!("stopping {} [{}]", cfg.name, program.pid);
                    let outcome = lifecycle::stop(cfg);
                    logmsg!("{} {:?}", cfg.name, outcome);
                }
                None => logmsg!("{} was not running", cfg.name),
            }
            ReturnCode::Success
        }
        Action::Restart => {
            perform_locked(Action::Stop, cfg);
            perform_locked(Action::Start, cfg)
        }
        Action::Status => match identity::get_running_program(cfg) {
            Some(program) => {
                logmsg!("{} is running (pid {})", cfg.name, program.pid);
                ReturnCode::Success
            }
            None => {
                logerr!("{} is NOT running", cfg.name);
                ReturnCode::GeneralFailure
            }
        },
    }
}

/// Serial `action all`: configuration order, aggregated exit code.
pub fn run_all_serial(action: Action, configs: &ConfigSet) -> ReturnCode {
    let mut codes = Vec::new();

    for cfg in configs.programs.values() {
        let code = perform(action, cfg);
        if !code.is_success() {
            logerr!("{} failed to {} with error {code}", cfg.name, action.as_str());
        }
        codes.push(code);
    }

    codes::aggregate(codes)
}

/// Parallel `action all --parallel`: one child process per program, joined
/// for their exit codes. A `fork` failure for one program is logged and
/// counted as a failure rather than aborting the whole fan-out.
pub fn run_all_parallel(action: Action, configs: &ConfigSet) -> ReturnCode {
    let mut children = Vec::new();

    for cfg in configs.programs.values() {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => children.push((cfg.name.clone(), child)),
            Ok(ForkResult::Child) => {
                let code = perform(action, cfg);
                std::process::exit(code.code());
            }
            Err(err) => {
                logerr!("{}: failed to fork worker: {err}", cfg.name);
                children.push((cfg.name.clone(), nix::unistd::Pid::from_raw(-1)));
            }
        }
    }

    let mut codes = Vec::new();
    for (name, pid) in children {
        if pid.as_raw() < 0 {
            codes.push(ReturnCode::GeneralFailure);
            continue;
        }
        let raw_code = match wait::waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, status)) => status,
            _ => ReturnCode::UnknownFailure.code(),
        };
        let resolved = ReturnCode::from_code(raw_code).unwrap_or(ReturnCode::UnknownFailure);
        if !resolved.is_success() {
            logerr!("{name}: {} -> {resolved}", action.as_str());
        }
        codes.push(resolved);
    }

    codes::aggregate(codes)
}
