//! Process lifecycle: start, stop, and the state machine between them.

use crate::codes::ReturnCode;
use crate::config::ProgramConfig;
use crate::process::{self, identity};
use crate::{logerr, logmsg};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NoAction,
    Terminated,
    Killed,
}

/// Start. Returns SUCCESS with the tracked target pid, or one of
/// INSUFFICIENT_PERMISSIONS / PROGRAM_FAILED_TO_LAUNCH /
/// PROGRAM_EXITED_UNEXPECTEDLY.
pub fn start(cfg: &ProgramConfig) -> (ReturnCode, Option<i32>) {
    if let Some(existing) = identity::get_running_program(cfg) {
        logmsg!("program {} already running (pid {})", cfg.name, existing.pid);
        return (ReturnCode::Success, Some(existing.pid));
    }

    let re = match cfg.compiled_proctitle_re() {
        Ok(re) => re,
        Err(err) => {
            logerr!("program {}: {err}", cfg.name);
            return (ReturnCode::InsufficientPermissions, None);
        }
    };

    let stdout = match OpenOptions::new().create(true).append(true).open(&cfg.stdout) {
        Ok(f) => f,
        Err(err) => {
            logerr!("program {}: cannot open stdout {}: {err}", cfg.name, cfg.stdout);
            return (ReturnCode::InsufficientPermissions, None);
        }
    };

    let stderr_path = cfg.stderr_path();
    let stderr: Stdio = if cfg.stderr.as_deref() == Some("stdout") || cfg.stderr.is_none() {
        match stdout.try_clone() {
            Ok(f) => Stdio::from(f),
            Err(err) => {
                logerr!("program {}: cannot duplicate stdout handle: {err}", cfg.name);
                return (ReturnCode::InsufficientPermissions, None);
            }
        }
    } else {
        match OpenOptions::new().create(true).append(true).open(&stderr_path) {
            Ok(f) => Stdio::from(f),
            Err(err) => {
                logerr!("program {}: cannot open stderr {stderr_path}: {err}", cfg.name);
                return (ReturnCode::InsufficientPermissions, None);
            }
        }
    };

    let mut command = if cfg.useshell {
        let mut c = Command::new("/bin/sh");
        c.arg("-c").arg(&cfg.command);
        c
    } else {
        let tokens = match shlex::split(&cfg.command) {
            Some(tokens) if !tokens.is_empty() => tokens,
            _ => {
                logerr!("program {}: could not tokenize command `{}`", cfg.name, cfg.command);
                return (ReturnCode::ProgramFailedToLaunch, None);
            }
        };
        let mut c = Command::new(&tokens[0]);
        c.args(&tokens[1..]);
        c
    };

    if !cfg.inherit_env {
        command.env_clear();
    }
    command.envs(&cfg.env);
    command.stdin(Stdio::null());
    command.stdout(stdout);
    command.stderr(stderr);

    let mut child: Child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            logerr!("program {}: failed to launch: {err}", cfg.name);
            return (ReturnCode::ProgramFailedToLaunch, None);
        }
    };

    let spawned_pid = child.id() as i32;

    // useshell auto-demotion: some shells exec() away, so the
    // spawned pid's own cmdline may already be the target.
    let effective_useshell = cfg.useshell
        && process::cmdline(spawned_pid)
            .map(|c| process::is_shell_wrapper(&c.cmdline))
            .unwrap_or(true);

    let poll_interval = Duration::from_secs_f64((cfg.success_seconds / 5.0).min(0.1));
    let deadline = Instant::now() + Duration::from_secs_f64(cfg.success_seconds);

    let mut target_pid: Option<i32> = None;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                logerr!("program {}: exited during probation ({status})", cfg.name);
                return (ReturnCode::ProgramFailedToLaunch, None);
            }
            Ok(None) => {}
            Err(err) => {
                logerr!("program {}: failed to poll spawned process: {err}", cfg.name);
                return (ReturnCode::ProgramFailedToLaunch, None);
            }
        }

        if let Some(pid) = target_pid {
            if !process::pid_alive(pid) {
                target_pid = None;
            }
        }

        if target_pid.is_none() {
            target_pid = find_target_pid(spawned_pid, effective_useshell, &re);
        }

        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(poll_interval);
    }

    match target_pid {
        None => {
            logerr!("program {}: no matching process found before probation ended", cfg.name);
            // The original leaves an orphaned `/bin/sh -c`
            // wrapper running here. Reap it instead of leaking it.
            if effective_useshell && process::pid_alive(spawned_pid) {
                logerr!("program {}: killing orphaned shell wrapper (pid {spawned_pid})", cfg.name);
                let _ = signal::kill(Pid::from_raw(spawned_pid), Signal::SIGKILL);
            }
            (ReturnCode::ProgramFailedToLaunch, None)
        }
        Some(pid) => {
            if cfg.autopid {
                if let Err(err) = identity::write_pidfile(&cfg.pidfile, pid) {
                    logerr!("program {}: failed to write pidfile: {err}", cfg.name);
                }
            }
            logmsg!("program {} started (pid {pid})", cfg.name);
            (ReturnCode::Success, Some(pid))
        }
    }
}

/// Find the pid that should be tracked: itself if not behind a shell,
/// otherwise the first non-shell-wrapper descendant matching `proctitle_re`.
fn find_target_pid(spawned_pid: i32, effective_useshell: bool, re: &regex::Regex) -> Option<i32> {
    if !effective_useshell {
        let info = process::cmdline(spawned_pid)?;
        return if re.is_match(&info.cmdline) {
            Some(spawned_pid)
        } else {
            None
        };
    }

    for pid in process::descendants(spawned_pid) {
        let Some(info) = process::cmdline(pid) else {
            continue;
        };
        if process::is_shell_wrapper(&info.cmdline) {
            continue;
        }
        if re.is_match(&info.cmdline) {
            return Some(pid);
        }
    }

    None
}

/// Stop.
pub fn stop(cfg: &ProgramConfig) -> StopOutcome {
    let Some(program) = identity::get_running_program(cfg) else {
        return StopOutcome::NoAction;
    };

    let pid = Pid::from_raw(program.pid);
    if signal::kill(pid, Signal::SIGTERM).is_err() {
        return StopOutcome::NoAction;
    }
    logmsg!("program {}: sent SIGTERM to pid {}", cfg.name, program.pid);

    let poll_interval = Duration::from_secs_f64((cfg.term_to_kill_seconds / 10.0).min(0.1));
    let deadline = Instant::now() + Duration::from_secs_f64(cfg.term_to_kill_seconds);

    let mut outcome = StopOutcome::Terminated;
    while Instant::now() < deadline {
        if !process::pid_alive(program.pid) {
            break;
        }
        thread::sleep(poll_interval);
    }

    if process::pid_alive(program.pid) {
        let _ = signal::kill(pid, Signal::SIGKILL);
        logmsg!("program {}: escalated to SIGKILL for pid {}", cfg.name, program.pid);
        outcome = StopOutcome::Killed;
    }

    match std::fs::remove_file(&cfg.pidfile) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => logerr!("program {}: failed to remove pidfile: {err}", cfg.name),
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Env, MonitoringConfig};

    fn program_cfg(name: &str, tmp: &std::path::Path, command: &str, useshell: bool) -> ProgramConfig {
        ProgramConfig {
            name: name.to_string(),
            command: command.to_string(),
            pidfile: tmp.join(format!("{name}.pid")).to_string_lossy().into_owned(),
            stdout: tmp.join(format!("{name}.out")).to_string_lossy().into_owned(),
            stderr: None,
            useshell,
            autostart: true,
            autorestart: true,
            autopid: true,
            scan_for_process: true,
            proctitle_re: None,
            success_seconds: 0.5,
            term_to_kill_seconds: 1.0,
            maxrestarts: 0,
            restart_delay: 0,
            enabled: true,
            inherit_env: true,
            env: Env::new(),
            monitoring: MonitoringConfig::default(),
            defaults: None,
        }
    }

    fn tmp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("usrsvc-lifecycle-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn start_and_stop_a_direct_exec_program() {
        let dir = tmp_dir("direct");
        let cfg = program_cfg("sleeper", &dir, "/bin/sleep 30", false);

        let (code, pid) = start(&cfg);
        assert_eq!(code, ReturnCode::Success);
        let pid = pid.expect("target pid should be found");
        assert!(process::pid_alive(pid));
        assert!(std::path::Path::new(&cfg.pidfile).exists());

        let outcome = stop(&cfg);
        assert_eq!(outcome, StopOutcome::Terminated);
        assert!(!std::path::Path::new(&cfg.pidfile).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn start_is_idempotent_when_already_running() {
        let dir = tmp_dir("idempotent");
        let cfg = program_cfg("sleeper2", &dir, "/bin/sleep 30", false);

        let (code1, pid1) = start(&cfg);
        assert_eq!(code1, ReturnCode::Success);
        let (code2, pid2) = start(&cfg);
        assert_eq!(code2, ReturnCode::Success);
        assert_eq!(pid1, pid2);

        stop(&cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failing_command_returns_program_failed_to_launch() {
        let dir = tmp_dir("failing");
        let cfg = program_cfg("bad", &dir, "/bin/false", false);

        let (code, _) = start(&cfg);
        assert_eq!(code, ReturnCode::ProgramFailedToLaunch);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stop_on_a_nonrunning_program_is_no_action() {
        let dir = tmp_dir("noaction");
        let cfg = program_cfg("ghost", &dir, "/bin/sleep 30", false);

        assert_eq!(stop(&cfg), StopOutcome::NoAction);

        std::fs::remove_dir_all(&dir).ok();
    }
}
