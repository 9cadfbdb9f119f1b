//! Program identity resolution: map a `ProgramConfig` to a currently
//! running `Program`, if any.

use crate::config::ProgramConfig;
use crate::logerr;
use crate::process;
use std::fs;

/// A discovered running instance. Transient: rebuilt on demand, never
/// persisted.
#[derive(Debug, Clone)]
pub struct Program {
    pub pid: i32,
    pub cmdline: String,
    pub executable: String,
    pub args: Vec<String>,
    pub running: bool,
    pub pidfile: String,
}

fn read_pidfile(path: &str) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn remove_pidfile(path: &str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => logerr!("failed to remove pidfile {path}: {err}"),
    }
}

pub fn write_pidfile(path: &str, pid: i32) -> std::io::Result<()> {
    fs::write(path, format!("{pid}\n"))
}

fn build(pid: i32, pidfile: &str) -> Option<Program> {
    let info = process::cmdline(pid)?;
    Some(Program {
        pid,
        cmdline: info.cmdline,
        executable: info.executable,
        args: info.args,
        running: true,
        pidfile: pidfile.to_string(),
    })
}

/// `getRunningProgram`. Never raises: every failure maps to `None`,
/// with a logged warning where informative.
pub fn get_running_program(cfg: &ProgramConfig) -> Option<Program> {
    let re = cfg.compiled_proctitle_re().ok()?;

    if let Some(pid) = read_pidfile(&cfg.pidfile) {
        if let Some(program) = build(pid, &cfg.pidfile) {
            if re.is_match(&program.cmdline) {
                return Some(program);
            }
            logerr!(
                "stale pidfile for program {}: pid {pid} does not match proctitle_re",
                cfg.name
            );
            remove_pidfile(&cfg.pidfile);
        } else {
            logerr!(
                "stale pidfile for program {}: pid {pid} is not running",
                cfg.name
            );
            remove_pidfile(&cfg.pidfile);
        }
    }

    if !cfg.scan_for_process {
        return None;
    }

    for pid in process::my_pids() {
        let Some(info) = process::cmdline(pid) else {
            continue;
        };
        if process::is_shell_wrapper(&info.cmdline) {
            continue;
        }
        if re.is_match(&info.cmdline) {
            if let Err(err) = write_pidfile(&cfg.pidfile, pid) {
                logerr!("failed to write pidfile for program {}: {err}", cfg.name);
            }
            return Some(Program {
                pid,
                cmdline: info.cmdline,
                executable: info.executable,
                args: info.args,
                running: true,
                pidfile: cfg.pidfile.clone(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Env, MonitoringConfig};
    use std::io::Write;

    fn program_cfg(name: &str, pidfile: &str, command: &str) -> ProgramConfig {
        ProgramConfig {
            name: name.to_string(),
            command: command.to_string(),
            pidfile: pidfile.to_string(),
            stdout: "/tmp/stdout.log".to_string(),
            stderr: None,
            useshell: false,
            autostart: true,
            autorestart: true,
            autopid: true,
            scan_for_process: false,
            proctitle_re: None,
            success_seconds: 2.0,
            term_to_kill_seconds: 8.0,
            maxrestarts: 0,
            restart_delay: 0,
            enabled: true,
            inherit_env: true,
            env: Env::new(),
            monitoring: MonitoringConfig::default(),
            defaults: None,
        }
    }

    #[test]
    fn stale_pidfile_referencing_a_dead_pid_is_removed() {
        let path = std::env::temp_dir().join(format!("usrsvc-stale-{}.pid", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "999999999").unwrap();
        drop(file);

        let cfg = program_cfg("stale", path.to_str().unwrap(), "/usr/bin/sleep 60");
        let result = get_running_program(&cfg);

        assert!(result.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn matching_pidfile_resolves_to_a_program() {
        let path = std::env::temp_dir().join(format!("usrsvc-self-{}.pid", std::process::id()));
        let pid = std::process::id() as i32;
        fs::write(&path, format!("{pid}\n")).unwrap();

        let our_cmdline = process::cmdline(pid).unwrap().cmdline;
        let mut cfg = program_cfg("self", path.to_str().unwrap(), &our_cmdline);
        cfg.proctitle_re = Some(regex::escape(&our_cmdline));

        let result = get_running_program(&cfg).expect("should resolve to the current process");
        assert_eq!(result.pid, pid);

        fs::remove_file(&path).ok();
    }
}
