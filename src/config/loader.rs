//! Ambient TOML-based reader for [`super::MainConfig`] / [`super::ProgramConfig`].
//!
//! The on-disk hierarchical format (`[Main]`, `[Program:<name>]`,
//! `[DefaultSettings:<name>]`) is explicitly out of scope for the supervision
//! engine — it consumes already-validated structs. This loader exists so the
//! `usrsvc`/`usrsvcd` binaries have a concrete, working way to obtain those
//! structs; it keeps the `[Main]`/`[Program:<name>]`/`[DefaultSettings:<name>]`
//! section names and `*.cfg` glob convention but expresses them as TOML
//! tables rather than a hand-rolled ConfigObj-style grammar, since no crate
//! in this codebase's dependency graph parses that legacy format.

use super::{ConfigError, ConfigSet, MainConfig, ProgramConfigRaw};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{0} does not exist")]
    Missing(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Deserialize, Default)]
struct Document {
    #[serde(default)]
    main: Option<MainConfig>,
    #[serde(default, rename = "program")]
    programs: IndexMap<String, toml::Value>,
    #[serde(default, rename = "defaults")]
    donors: IndexMap<String, toml::Value>,
}

/// `ProgramConfigRaw` minus `name`, since the TOML table key supplies it.
fn into_program(name: &str, mut value: toml::Value) -> Result<ProgramConfigRaw, LoadError> {
    if let toml::Value::Table(table) = &mut value {
        table
            .entry("name".to_string())
            .or_insert_with(|| toml::Value::String(name.to_string()));
    }
    value.try_into().map_err(|source| LoadError::Toml {
        path: format!("program:{name}"),
        source,
    })
}

fn read_document(path: &Path) -> Result<Document, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| LoadError::Toml {
        path: path.display().to_string(),
        source,
    })
}

/// Load the main config file plus every `*.cfg` file under its `config_dir`,
/// merge `defaults=` donors, and validate the result.
pub fn load(main_path: &Path) -> Result<ConfigSet, LoadError> {
    if !main_path.exists() {
        return Err(LoadError::Missing(main_path.display().to_string()));
    }

    let mut doc = read_document(main_path)?;
    let main = doc.main.take().unwrap_or(MainConfig {
        config_dir: None,
        pidfile: MainConfig::default_pidfile(),
        usrsvcd_stdout: None,
        usrsvcd_stderr: None,
    });

    let mut programs = IndexMap::new();
    let mut donors = IndexMap::new();

    for (name, raw) in doc.programs {
        programs.insert(name.clone(), into_program(&name, raw)?);
    }
    for (name, raw) in doc.donors {
        insert_donor(&mut donors, name, raw)?;
    }

    if let Some(dir) = &main.config_dir {
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("cfg") {
                continue;
            }
            let extra = read_document(&path)?;
            for (name, raw) in extra.programs {
                programs.insert(name.clone(), into_program(&name, raw)?);
            }
            for (name, raw) in extra.donors {
                insert_donor(&mut donors, name, raw)?;
            }
        }
    }

    ConfigSet::build(main, programs, donors).map_err(LoadError::from)
}

/// A `DefaultSettings:<name>` donor must be unique across the main config
/// and every `config_dir/*.cfg` file it pulls in — unlike programs (where a
/// later file legitimately overrides an earlier one), two donors sharing a
/// name is always a configuration mistake, since whichever file loads last
/// would otherwise silently win.
fn insert_donor(donors: &mut IndexMap<String, ProgramConfigRaw>, name: String, raw: toml::Value) -> Result<(), LoadError> {
    if donors.contains_key(&name) {
        return Err(LoadError::Config(ConfigError::DuplicateDefaults(name)));
    }
    donors.insert(name.clone(), into_program(&name, raw)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_single_program_config() {
        let dir = std::env::temp_dir().join(format!("usrsvc-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let cfg_path = dir.join("usrsvc.cfg");

        let mut file = fs::File::create(&cfg_path).unwrap();
        writeln!(
            file,
            r#"
            [main]
            pidfile = "{dir}/usrsvcd.pid"

            [program.foo]
            command = "/usr/bin/sleep 60"
            pidfile = "{dir}/foo.pid"
            stdout = "{dir}/foo.log"
            useshell = false
            success_seconds = 0.5
            "#,
            dir = dir.display()
        )
        .unwrap();

        let set = load(&cfg_path).unwrap();
        assert_eq!(set.programs.len(), 1);
        let foo = &set.programs["foo"];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.command, "/usr/bin/sleep 60");
        assert!(!foo.useshell);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn programs_iterate_in_configuration_order_not_alphabetical_order() {
        let dir = std::env::temp_dir().join(format!("usrsvc-order-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let cfg_path = dir.join("usrsvc.cfg");

        fs::write(
            &cfg_path,
            format!(
                r#"
                [main]
                pidfile = "{dir}/usrsvcd.pid"

                [program.zeta]
                command = "/usr/bin/true"
                pidfile = "{dir}/zeta.pid"
                stdout = "{dir}/zeta.log"

                [program.alpha]
                command = "/usr/bin/true"
                pidfile = "{dir}/alpha.pid"
                stdout = "{dir}/alpha.log"
                "#,
                dir = dir.display()
            ),
        )
        .unwrap();

        let set = load(&cfg_path).unwrap();
        let names: Vec<&str> = set.programs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_donor_across_config_dir_files_is_rejected() {
        let dir = std::env::temp_dir().join(format!("usrsvc-dupdonor-{}", std::process::id()));
        let extras = dir.join("extras.d");
        fs::create_dir_all(&extras).unwrap();
        let cfg_path = dir.join("usrsvc.cfg");

        fs::write(
            &cfg_path,
            format!(
                r#"
                [main]
                pidfile = "{dir}/usrsvcd.pid"
                config_dir = "{extras}"

                [defaults.common]
                command = "/usr/bin/true"
                pidfile = "{dir}/common.pid"
                stdout = "{dir}/common.log"
                "#,
                dir = dir.display(),
                extras = extras.display(),
            ),
        )
        .unwrap();

        fs::write(
            extras.join("more.cfg"),
            format!(
                r#"
                [defaults.common]
                command = "/usr/bin/false"
                pidfile = "{dir}/common2.pid"
                stdout = "{dir}/common2.log"
                "#,
                dir = dir.display(),
            ),
        )
        .unwrap();

        let result = load(&cfg_path);
        assert!(matches!(
            result,
            Err(LoadError::Config(ConfigError::DuplicateDefaults(name))) if name == "common"
        ));

        fs::remove_dir_all(&dir).ok();
    }
}
