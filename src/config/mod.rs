use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::supervisor::process::LaunchSpec;
use crate::supervisor::SupervisorOptions;

pub const DEFAULT_CONFIG_PATH: &str = "mc-runner.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `mc-runner.toml`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Server directory; the process runs here
    pub dir: PathBuf,
    /// Server jar, relative to `dir` or absolute
    pub jar: String,
    #[serde(default = "default_java")]
    pub java: String,
    /// Heap size for both -Xms and -Xmx
    #[serde(default = "default_ram")]
    pub ram: String,
    /// Extra classpath; switches to launching the main class directly
    pub classpath: Option<String>,
    pub log4j: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Periodic restart after a successful start
    pub restart_delay_secs: Option<u64>,
    #[serde(default = "default_restart_warning")]
    pub restart_warning_secs: u64,
}

fn default_java() -> String {
    "java".to_string()
}

fn default_ram() -> String {
    "1G".to_string()
}

fn default_stop_timeout() -> u64 {
    60
}

fn default_restart_warning() -> u64 {
    30
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// JVM arguments for the server.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-Xms{}", self.ram),
            format!("-Xmx{}", self.ram),
            format!("-Dlog4j.configurationFile={}", self.log4j.as_deref().unwrap_or("")),
        ];
        match &self.classpath {
            None => args.extend(["-jar".to_string(), self.jar.clone()]),
            Some(classpath) => args.extend([
                "-cp".to_string(),
                format!("{}:{}", classpath, self.jar),
                "net.minecraft.server.MinecraftServer".to_string(),
            ]),
        }
        args.push("nogui".to_string());
        args
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::new(self.java.clone())
            .args(self.launch_args())
            .working_dir(self.dir.clone())
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            stop_timeout: (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs)),
            echo_output: self.debug,
            ..SupervisorOptions::default()
        }
    }

    pub fn restart_delay(&self) -> Option<Duration> {
        self.restart_delay_secs.map(Duration::from_secs)
    }

    pub fn restart_warning(&self) -> Duration {
        Duration::from_secs(self.restart_warning_secs)
    }
}
