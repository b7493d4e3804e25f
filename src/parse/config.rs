use crate::parse::hls::HlsConfig;
use crate::runtime::ManagerOptions;
use anyhow::Context;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, time::Duration};

fn default_autostart() -> bool { true }
fn default_logdir() -> String { String::from("logs") }


#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    #[serde(flatten)]
    pub hls: HlsConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SupervisorSection {
    /// Encoder executable, blank means `ffmpeg` from PATH.
    #[serde(default)]
    pub ffmpeg: String,
    /// Seconds to wait after SIGINT, and again after SIGKILL. Zero or negative means the default.
    #[serde(default)]
    pub stoptime: i64,
    #[serde(default = "default_logdir")]
    pub logdir: String,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            ffmpeg: String::new(),
            stoptime: 0,
            logdir: default_logdir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub streams: BTreeMap<String, StreamEntry>,
}

impl Config {
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            ffmpeg_binary: self.supervisor.ffmpeg.clone(),
            stop_timeout: u64::try_from(self.supervisor.stoptime)
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO),
        }
    }
}



/*
    @@@
    @parser();
    . Reads the supervisor YAML file into a String. Any I/O error (file not found, permission denied, etc.) is returned with the path attached.
    . Hands the raw text to parse_str().
*/
pub fn parser(path: &str) -> anyhow::Result<Config> {
    let yaml_file = fs::read_to_string(path)
        .with_context(|| format!("read config file {path}"))?;
    parse_str(&yaml_file).with_context(|| format!("parse config file {path}"))
}

/*
    @@@
    @parse_str();
    . Maps YAML text onto Config; missing sections fall back to their defaults.
    . Stream fields are not validated here, the manager normalizes them on start.
*/
pub fn parse_str(yaml: &str) -> anyhow::Result<Config> {
    let parsed_config: Config = serde_yaml::from_str(yaml)?;
    Ok(parsed_config)
}
