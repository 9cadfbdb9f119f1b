//! The data model: `MainConfig`, `ProgramConfig`, `MonitoringConfig`, and
//! the `defaults=` donor-merge algorithm.
//!
//! Parsing the on-disk hierarchical config format itself is out of scope for
//! the supervisor — it consumes already-validated values. [`loader`] provides
//! an ambient TOML-based reader so the CLI and daemon binaries have somewhere
//! to get these structs from; it is a convenience layer, not part of the core
//! contract.

pub mod loader;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("unknown `defaults` donor: {0}")]
    UnknownDefaults(String),
    #[error("duplicate `DefaultSettings:{0}` section")]
    DuplicateDefaults(String),
    #[error("term_to_kill_seconds must be >= 0, got {0}")]
    NegativeTermToKill(f64),
    #[error("rss_limit must be >= 0, got {0}")]
    NegativeRssLimit(i64),
    #[error("invalid proctitle_re for program {0}: {1}")]
    BadRegex(String, regex::Error),
    #[error("program {0} is missing required field `{1}`")]
    MissingField(String, &'static str),
    #[error("parent directory of {0}={1} does not exist")]
    MissingParentDir(&'static str, String),
}

fn require_absolute(label: &str, value: &str) -> Result<(), ConfigError> {
    if Path::new(value).is_absolute() {
        Ok(())
    } else {
        Err(ConfigError::NotAbsolute(format!("{label}={value}")))
    }
}

/// `stdout`, `stderr`, and `activityfile` must each have an existing parent
/// directory. Checked at config-validation time rather than discovered
/// incidentally when `start` opens the file, so `status`/`stop` on a
/// misconfigured program fail the same way `start` would.
fn require_parent_dir_exists(label: &'static str, value: &str) -> Result<(), ConfigError> {
    if Path::new(value).parent().is_some_and(Path::is_dir) {
        Ok(())
    } else {
        Err(ConfigError::MissingParentDir(label, value.to_string()))
    }
}

/// Process-wide settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainConfig {
    /// Additional directory scanned for `*.cfg` program config files.
    #[serde(default)]
    pub config_dir: Option<String>,
    /// Absolute pidfile for the daemon itself.
    #[serde(default = "MainConfig::default_pidfile")]
    pub pidfile: String,
    /// Absolute path, or omitted for "don't redirect".
    #[serde(default)]
    pub usrsvcd_stdout: Option<String>,
    /// Absolute path, or literal `"stdout"` meaning "join stdout", or omitted.
    #[serde(default)]
    pub usrsvcd_stderr: Option<String>,
}

impl MainConfig {
    pub fn default_pidfile() -> String {
        let home = home::home_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/tmp".to_string());
        let uid = unsafe { libc::getuid() };
        format!("{home}/{uid}_usrsvcd.pid")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_absolute("pidfile", &self.pidfile)?;
        if let Some(dir) = &self.config_dir {
            require_absolute("config_dir", dir.trim_end_matches('/'))?;
        }
        if let Some(out) = &self.usrsvcd_stdout {
            require_absolute("usrsvcd_stdout", out)?;
        }
        if let Some(err) = &self.usrsvcd_stderr {
            if err != "stdout" {
                require_absolute("usrsvcd_stderr", err)?;
            }
        }
        Ok(())
    }
}

/// Monitoring subsection of a program.
#[derive(Clone, Debug, Default)]
pub struct MonitoringConfig {
    pub monitor_after: u64,
    pub activityfile: String,
    pub activityfile_limit: u64,
    pub rss_limit: i64,
}

fn default_monitor_after() -> u64 {
    30
}

fn default_activityfile_limit() -> u64 {
    120
}

impl MonitoringConfig {
    pub fn is_active(&self) -> bool {
        !self.activityfile.is_empty() || self.rss_limit > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.activityfile.is_empty() {
            require_absolute("activityfile", &self.activityfile)?;
            require_parent_dir_exists("activityfile", &self.activityfile)?;
        }
        if self.rss_limit < 0 {
            return Err(ConfigError::NegativeRssLimit(self.rss_limit));
        }
        Ok(())
    }
}

/// Deserialize-only mirror of [`MonitoringConfig`] where every field is
/// optional, so the `defaults=` merge can tell "key never written" apart from
/// "key written with a value that happens to equal the default".
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct MonitoringConfigRaw {
    monitor_after: Option<u64>,
    activityfile: Option<String>,
    activityfile_limit: Option<u64>,
    rss_limit: Option<i64>,
}

impl MonitoringConfigRaw {
    /// Subsection-level merge used by the `defaults=` donor rule: a key this
    /// program's own section never wrote falls back to the donor; a key it
    /// did write wins outright, regardless of the value.
    fn merge_over(self, donor: &MonitoringConfigRaw) -> MonitoringConfigRaw {
        MonitoringConfigRaw {
            monitor_after: self.monitor_after.or(donor.monitor_after),
            activityfile: self.activityfile.or_else(|| donor.activityfile.clone()),
            activityfile_limit: self.activityfile_limit.or(donor.activityfile_limit),
            rss_limit: self.rss_limit.or(donor.rss_limit),
        }
    }

    fn collapse(self) -> MonitoringConfig {
        MonitoringConfig {
            monitor_after: self.monitor_after.unwrap_or_else(default_monitor_after),
            activityfile: self.activityfile.unwrap_or_default(),
            activityfile_limit: self.activityfile_limit.unwrap_or_else(default_activityfile_limit),
            rss_limit: self.rss_limit.unwrap_or(0),
        }
    }
}

pub type Env = BTreeMap<String, String>;

/// One program's contract.
#[derive(Clone, Debug)]
pub struct ProgramConfig {
    pub name: String,
    pub command: String,
    pub pidfile: String,
    pub stdout: String,

    pub stderr: Option<String>,
    pub useshell: bool,
    pub autostart: bool,
    pub autorestart: bool,
    pub autopid: bool,
    pub scan_for_process: bool,
    pub proctitle_re: Option<String>,
    pub success_seconds: f64,
    pub term_to_kill_seconds: f64,
    pub maxrestarts: u32,
    pub restart_delay: u64,
    pub enabled: bool,
    pub inherit_env: bool,
    pub env: Env,
    pub monitoring: MonitoringConfig,
    pub defaults: Option<String>,
}

fn default_success_seconds() -> f64 {
    2.0
}

fn default_term_to_kill_seconds() -> f64 {
    8.0
}

impl ProgramConfig {
    /// Literal-escape of the command tokens joined by a space, anchored at
    /// end of line — the default `proctitle_re` when none is configured.
    /// Tokenized with POSIX-shell quoting rules, same as `useshell=false`
    /// spawning, so a quoted argument collapses to the bare word the kernel
    /// actually puts in `/proc/<pid>/cmdline` rather than keeping its quotes.
    pub fn default_proctitle_re(command: &str) -> String {
        let tokens = shlex::split(command).unwrap_or_else(|| command.split_whitespace().map(String::from).collect());
        format!("{}$", regex::escape(&tokens.join(" ")))
    }

    pub fn compiled_proctitle_re(&self) -> Result<Regex, ConfigError> {
        let pattern = self
            .proctitle_re
            .clone()
            .unwrap_or_else(|| Self::default_proctitle_re(&self.command));
        Regex::new(&pattern).map_err(|e| ConfigError::BadRegex(self.name.clone(), e))
    }

    pub fn stderr_path(&self) -> String {
        self.stderr.clone().unwrap_or_else(|| self.stdout.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_absolute("pidfile", &self.pidfile)?;
        require_absolute("stdout", &self.stdout)?;
        require_parent_dir_exists("stdout", &self.stdout)?;
        if let Some(stderr) = &self.stderr {
            if stderr != "stdout" {
                require_absolute("stderr", stderr)?;
                require_parent_dir_exists("stderr", stderr)?;
            }
        }
        if self.term_to_kill_seconds < 0.0 {
            return Err(ConfigError::NegativeTermToKill(self.term_to_kill_seconds));
        }
        self.compiled_proctitle_re()?;
        self.monitoring.validate()?;
        Ok(())
    }
}

/// Deserialize-only mirror of [`ProgramConfig`] where every field is
/// optional. The loader parses each `[program.<name>]` table into this shape
/// first, so `defaults=` merging operates on raw key presence rather than on
/// comparing against compiled-in defaults — the same level the original
/// dict-based merge works at (`item2.update(item)` only overwrites keys the
/// program's own section actually has).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct ProgramConfigRaw {
    name: Option<String>,
    command: Option<String>,
    pidfile: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    useshell: Option<bool>,
    autostart: Option<bool>,
    autorestart: Option<bool>,
    autopid: Option<bool>,
    scan_for_process: Option<bool>,
    proctitle_re: Option<String>,
    success_seconds: Option<f64>,
    term_to_kill_seconds: Option<f64>,
    maxrestarts: Option<u32>,
    restart_delay: Option<u64>,
    enabled: Option<bool>,
    inherit_env: Option<bool>,
    env: Option<Env>,
    monitoring: Option<MonitoringConfigRaw>,
    defaults: Option<String>,
}

impl ProgramConfigRaw {
    /// Apply the `defaults=<name>` donor-merge rule: `env` merges
    /// key-by-key with the program's own keys winning; `monitoring` recurses
    /// at the same raw level; every other field falls back to the donor only
    /// if the program's own section never set it.
    fn merge_defaults(mut self, donor: &ProgramConfigRaw) -> ProgramConfigRaw {
        let mut env = donor.env.clone().unwrap_or_default();
        env.extend(self.env.clone().unwrap_or_default());
        self.env = Some(env);

        let own_monitoring = self.monitoring.clone().unwrap_or_default();
        let donor_monitoring = donor.monitoring.clone().unwrap_or_default();
        self.monitoring = Some(own_monitoring.merge_over(&donor_monitoring));

        self.command = self.command.or_else(|| donor.command.clone());
        self.pidfile = self.pidfile.or_else(|| donor.pidfile.clone());
        self.stdout = self.stdout.or_else(|| donor.stdout.clone());
        self.stderr = self.stderr.or_else(|| donor.stderr.clone());
        self.useshell = self.useshell.or(donor.useshell);
        self.autostart = self.autostart.or(donor.autostart);
        self.autorestart = self.autorestart.or(donor.autorestart);
        self.autopid = self.autopid.or(donor.autopid);
        self.scan_for_process = self.scan_for_process.or(donor.scan_for_process);
        self.proctitle_re = self.proctitle_re.or_else(|| donor.proctitle_re.clone());
        self.success_seconds = self.success_seconds.or(donor.success_seconds);
        self.term_to_kill_seconds = self.term_to_kill_seconds.or(donor.term_to_kill_seconds);
        self.maxrestarts = self.maxrestarts.or(donor.maxrestarts);
        self.restart_delay = self.restart_delay.or(donor.restart_delay);
        self.enabled = self.enabled.or(donor.enabled);
        self.inherit_env = self.inherit_env.or(donor.inherit_env);

        self
    }

    /// Collapse into the concrete [`ProgramConfig`], applying final defaults
    /// to every field still unset after donor-merging.
    fn collapse(self, name: String) -> Result<ProgramConfig, ConfigError> {
        let command = self
            .command
            .ok_or_else(|| ConfigError::MissingField(name.clone(), "command"))?;
        let pidfile = self
            .pidfile
            .ok_or_else(|| ConfigError::MissingField(name.clone(), "pidfile"))?;
        let stdout = self
            .stdout
            .ok_or_else(|| ConfigError::MissingField(name.clone(), "stdout"))?;

        Ok(ProgramConfig {
            name,
            command,
            pidfile,
            stdout,
            stderr: self.stderr,
            useshell: self.useshell.unwrap_or(true),
            autostart: self.autostart.unwrap_or(true),
            autorestart: self.autorestart.unwrap_or(true),
            autopid: self.autopid.unwrap_or(true),
            scan_for_process: self.scan_for_process.unwrap_or(true),
            proctitle_re: self.proctitle_re,
            success_seconds: self.success_seconds.unwrap_or_else(default_success_seconds),
            term_to_kill_seconds: self.term_to_kill_seconds.unwrap_or_else(default_term_to_kill_seconds),
            maxrestarts: self.maxrestarts.unwrap_or(0),
            restart_delay: self.restart_delay.unwrap_or(0),
            enabled: self.enabled.unwrap_or(true),
            inherit_env: self.inherit_env.unwrap_or(true),
            env: self.env.unwrap_or_default(),
            monitoring: self.monitoring.unwrap_or_default().collapse(),
            defaults: self.defaults,
        })
    }
}

/// A fully parsed configuration set: the main config plus every program,
/// donor-merged and validated. Built fresh at daemon startup and on every
/// supervision-loop round so config edits take effect without a restart.
#[derive(Clone, Debug)]
pub struct ConfigSet {
    pub main: MainConfig,
    pub programs: IndexMap<String, ProgramConfig>,
}

impl ConfigSet {
    /// Resolve every program's `defaults=` donor and validate the result.
    /// `donors` are `DefaultSettings:<name>` sections, resolved once here
    /// at parse time. `programs` keeps the order its entries were
    /// discovered in, so the built `ConfigSet` preserves
    /// configuration-iteration order for serial/parallel `all` fan-out.
    pub(crate) fn build(
        main: MainConfig,
        programs: IndexMap<String, ProgramConfigRaw>,
        donors: IndexMap<String, ProgramConfigRaw>,
    ) -> Result<ConfigSet, ConfigError> {
        main.validate()?;

        let mut built = IndexMap::with_capacity(programs.len());
        for (name, raw) in programs {
            let merged = match &raw.defaults {
                Some(donor_name) => {
                    let donor = donors
                        .get(donor_name)
                        .ok_or_else(|| ConfigError::UnknownDefaults(donor_name.clone()))?;
                    raw.merge_defaults(donor)
                }
                None => raw,
            };
            let program = merged.collapse(name.clone())?;
            program.validate()?;
            built.insert(name, program);
        }

        Ok(ConfigSet { main, programs: built })
    }

    pub fn enabled_programs(&self) -> impl Iterator<Item = &ProgramConfig> {
        self.programs.values().filter(|p| p.enabled)
    }
}

pub fn pidfile_path(program: &ProgramConfig) -> PathBuf {
    PathBuf::from(&program.pidfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(name: &str) -> ProgramConfig {
        ProgramConfig {
            name: name.to_string(),
            command: "/usr/bin/sleep 60".to_string(),
            pidfile: format!("/tmp/{name}.pid"),
            stdout: format!("/tmp/{name}.out"),
            stderr: None,
            useshell: true,
            autostart: true,
            autorestart: true,
            autopid: true,
            scan_for_process: true,
            proctitle_re: None,
            success_seconds: default_success_seconds(),
            term_to_kill_seconds: default_term_to_kill_seconds(),
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
    fn default_proctitle_re_is_literal_and_anchored() {
        let re = ProgramConfig::default_proctitle_re("/usr/bin/sleep 60");
        assert_eq!(re, r"/usr/bin/sleep\ 60$");
    }

    #[test]
    fn default_proctitle_re_strips_quotes_from_quoted_arguments() {
        let re = ProgramConfig::default_proctitle_re("/bin/echo 'hello world'");
        assert_eq!(re, r"/bin/echo\ hello\ world$");
    }

    #[test]
    fn monitoring_is_active_only_with_a_configured_check() {
        let mut m = MonitoringConfig::default();
        assert!(!m.is_active());
        m.rss_limit = 1024;
        assert!(m.is_active());
    }

    fn raw(name: &str) -> ProgramConfigRaw {
        ProgramConfigRaw {
            name: Some(name.to_string()),
            command: Some("/usr/bin/sleep 60".to_string()),
            pidfile: Some(format!("/tmp/{name}.pid")),
            stdout: Some(format!("/tmp/{name}.out")),
            ..Default::default()
        }
    }

    #[test]
    fn env_merge_keeps_program_values_over_donor() {
        let mut donor = raw("donor");
        donor.env = Some(Env::from([("A".into(), "donor-a".into()), ("B".into(), "donor-b".into())]));

        let mut p = raw("p");
        p.env = Some(Env::from([("A".into(), "program-a".into())]));
        p.defaults = Some("donor".into());

        let merged = p.merge_defaults(&donor).collapse("p".into()).unwrap();
        assert_eq!(merged.env.get("A").unwrap(), "program-a");
        assert_eq!(merged.env.get("B").unwrap(), "donor-b");
    }

    #[test]
    fn unset_top_level_keys_fall_back_to_donor() {
        let mut donor = raw("donor");
        donor.maxrestarts = Some(5);
        donor.restart_delay = Some(10);

        let p = raw("p");
        let merged = p.merge_defaults(&donor).collapse("p".into()).unwrap();

        assert_eq!(merged.maxrestarts, 5);
        assert_eq!(merged.restart_delay, 10);
    }

    /// The bug this raw/`Option`-based merge exists to prevent: a program
    /// that explicitly sets a key must keep that value even when it happens
    /// to equal the compiled-in default and the donor disagrees.
    #[test]
    fn explicit_value_matching_the_default_is_not_overwritten_by_donor() {
        let mut donor = raw("donor");
        donor.useshell = Some(false);

        let mut p = raw("p");
        p.useshell = Some(true);

        let merged = p.merge_defaults(&donor).collapse("p".into()).unwrap();
        assert!(merged.useshell);
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut p = program("p");
        p.pidfile = "relative.pid".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn stdout_with_a_nonexistent_parent_dir_is_rejected() {
        let mut p = program("parentless");
        p.stdout = "/no/such/directory/here/out.log".to_string();
        assert!(matches!(p.validate(), Err(ConfigError::MissingParentDir("stdout", _))));
    }

    #[test]
    fn activityfile_with_a_nonexistent_parent_dir_is_rejected() {
        let mut m = MonitoringConfig::default();
        m.activityfile = "/no/such/directory/here/activity".to_string();
        assert!(matches!(m.validate(), Err(ConfigError::MissingParentDir("activityfile", _))));
    }

    #[test]
    fn missing_pidfile_falls_back_to_the_default_pidfile() {
        let toml_text = "config_dir = \"/tmp\"\n";
        let main: MainConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(main.pidfile, MainConfig::default_pidfile());
    }

    #[test]
    fn build_rejects_unknown_defaults_donor() {
        let mut p = raw("p");
        p.defaults = Some("missing".into());
        let mut programs = IndexMap::new();
        programs.insert("p".to_string(), p);

        let main = MainConfig {
            config_dir: None,
            pidfile: "/tmp/usrsvcd.pid".to_string(),
            usrsvcd_stdout: None,
            usrsvcd_stderr: None,
        };

        let result = ConfigSet::build(main, programs, IndexMap::new());
        assert!(matches!(result, Err(ConfigError::UnknownDefaults(_))));
    }
}
