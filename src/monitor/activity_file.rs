//! ActivityFileMonitor: restart iff the program has stopped touching its
//! activity file.

use crate::config::MonitoringConfig;
use crate::process;
use crate::process::identity::Program;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct ActivityFileMonitor {
    path: String,
    limit_seconds: u64,
}

impl ActivityFileMonitor {
    pub fn create_from_config(cfg: &MonitoringConfig) -> Option<Self> {
        if cfg.activityfile.is_empty() {
            return None;
        }
        Some(ActivityFileMonitor {
            path: cfg.activityfile.clone(),
            limit_seconds: cfg.activityfile_limit,
        })
    }

    pub fn should_restart(&self, _program: &Program) -> bool {
        let Some(mtime) = process::mtime(&self.path) else {
            return true;
        };

        match SystemTime::now().duration_since(mtime) {
            Ok(age) => age.as_secs() > self.limit_seconds,
            Err(_) => false,
        }
    }
}
