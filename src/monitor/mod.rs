//! Monitors: pluggable liveness checks that can demand a restart.

pub mod activity_file;
pub mod rss_limit;

use crate::config::MonitoringConfig;
use crate::logerr;
use crate::process::identity::Program;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A tagged variant rather than dynamic class registration. New checks
/// extend this enum; no runtime reflection required.
#[derive(Debug, Clone)]
pub enum MonitorKind {
    ActivityFile(activity_file::ActivityFileMonitor),
    RssLimit(rss_limit::RssLimitMonitor),
}

impl MonitorKind {
    fn name(&self) -> &'static str {
        match self {
            MonitorKind::ActivityFile(_) => "activityfile",
            MonitorKind::RssLimit(_) => "rss_limit",
        }
    }

    fn should_restart(&self, program: &Program) -> bool {
        match self {
            MonitorKind::ActivityFile(m) => m.should_restart(program),
            MonitorKind::RssLimit(m) => m.should_restart(program),
        }
    }
}

/// `createFromConfig` returns `None` when a check is disabled by
/// configuration (e.g. empty `activityfile`, zero `rss_limit`).
pub fn from_config(cfg: &MonitoringConfig) -> Vec<MonitorKind> {
    let mut monitors = Vec::new();
    if let Some(m) = activity_file::ActivityFileMonitor::create_from_config(cfg) {
        monitors.push(MonitorKind::ActivityFile(m));
    }
    if let Some(m) = rss_limit::RssLimitMonitor::create_from_config(cfg) {
        monitors.push(MonitorKind::RssLimit(m));
    }
    monitors
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorReport {
    pub do_restart: bool,
    pub triggered: Option<&'static str>,
    pub num_ran: usize,
    pub runtime: Duration,
}

/// Runs monitors in configured order; the first `true` short-circuits. Each
/// check runs with a bounded wall-time budget on a worker thread; a timeout
/// is logged and treated as "no restart this round", same as any other
/// monitor error.
pub fn execute_list(monitors: &[MonitorKind], program: &Program) -> MonitorReport {
    let start = Instant::now();
    let mut report = MonitorReport::default();

    for monitor in monitors {
        report.num_ran += 1;

        let (tx, rx) = mpsc::channel();
        let kind = monitor.clone();
        let program = program.clone();
        thread::spawn(move || {
            let _ = tx.send(kind.should_restart(&program));
        });

        match rx.recv_timeout(CHECK_TIMEOUT) {
            Ok(true) => {
                report.do_restart = true;
                report.triggered = Some(monitor.name());
                break;
            }
            Ok(false) => {}
            Err(_) => {
                logerr!("monitor {} timed out after {:?}", monitor.name(), CHECK_TIMEOUT);
            }
        }
    }

    report.runtime = start.elapsed();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(pid: i32) -> Program {
        Program {
            pid,
            cmdline: "x".into(),
            executable: "x".into(),
            args: vec![],
            running: true,
            pidfile: "/tmp/x.pid".into(),
        }
    }

    #[test]
    fn no_monitors_configured_means_no_restart() {
        let report = execute_list(&[], &program(1));
        assert!(!report.do_restart);
        assert_eq!(report.num_ran, 0);
    }

    #[test]
    fn first_true_short_circuits() {
        let cfg = MonitoringConfig {
            monitor_after: 0,
            activityfile: String::new(),
            activityfile_limit: 120,
            rss_limit: 1,
        };
        let monitors = from_config(&cfg);
        assert_eq!(monitors.len(), 1);

        // rss_limit=1kb will trivially be exceeded by any real process.
        let pid = std::process::id() as i32;
        let report = execute_list(&monitors, &program(pid));
        assert!(report.do_restart);
        assert_eq!(report.triggered, Some("rss_limit"));
    }
}
