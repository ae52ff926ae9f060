use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;
use simple_error::{bail, simple_error};

/// How child commands are launched: `<path>` run as `<name> <command_flag> <command>`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    pub path: PathBuf,
    pub name: String,
    pub command_flag: String,
    // exit code of a child whose shell could not be started
    pub exec_failure_code: i32,
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            path: PathBuf::from("/bin/sh"),
            name: "sh".to_string(),
            command_flag: "-c".to_string(),
            exec_failure_code: 127,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    // stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string(), file: None }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        LevelFilter::from_str(&self.level).map_err(|_| simple_error!(format!("unknown log level {:?}", self.level)).into())
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Popen2Config {
    pub shell: ShellConfig,
    pub log: LogConfig,
}

impl Popen2Config {
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Popen2Config> {
        let config: Popen2Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.shell.name.is_empty() {
            bail!(simple_error!("shell.name must not be empty"));
        }
        if self.shell.command_flag.is_empty() {
            bail!(simple_error!("shell.command_flag must not be empty"));
        }
        if !(0..=255).contains(&self.shell.exec_failure_code) {
            bail!(simple_error!(format!("shell.exec_failure_code {} is not a valid exit code", self.shell.exec_failure_code)));
        }
        self.log.level_filter()?;
        Ok(())
    }
}

/***
Load and validate a TOML configuration file.
 */
pub fn load_config(path: &Path) -> anyhow::Result<Popen2Config> {
    let mut config_file = File::open(path)?;
    let mut toml_config = String::new();
    config_file.read_to_string(&mut toml_config)?;

    Popen2Config::from_toml(&toml_config)
}
