use std::{collections::HashMap, path::PathBuf, time::Duration};

pub const REVEAL_DURATION: Duration = Duration::from_millis(60_000);
pub const MAX_STORAGE_ITEMS: usize = 1000;
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(30_000);
pub const SCHEMA_VERSION: &str = "1.1";
pub const DATA_KEY: &str = "revealed-projects";
pub const VERSION_KEY: &str = "revealed-projects-version";
pub const DEFAULT_PORT: u16 = 6380;

/// Tunables of a [`crate::RevealStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub reveal_duration: Duration,
    pub max_items: usize,
    pub sweep_interval: Duration,
    pub schema_version: String,
    pub data_key: String,
    pub version_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            reveal_duration: REVEAL_DURATION,
            max_items: MAX_STORAGE_ITEMS,
            sweep_interval: SWEEP_INTERVAL,
            schema_version: SCHEMA_VERSION.to_string(),
            data_key: DATA_KEY.to_string(),
            version_key: VERSION_KEY.to_string(),
        }
    }
}

/// Command line configuration: `--<parameter> <value>` pairs plus the
/// `--verbose` and `--quiet` flags.
#[derive(Debug, Default)]
pub struct Config {
    values: HashMap<Parameter, String>,
    pub verbose: bool,
    pub quiet: bool,
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum Parameter {
    Dir,
    Port,
    RevealDurationMs,
    MaxItems,
    SweepIntervalMs,
    SchemaVersion,
}

impl Parameter {
    pub fn deserialize(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dir" => Ok(Parameter::Dir),
            "port" => Ok(Parameter::Port),
            "reveal-duration-ms" => Ok(Parameter::RevealDurationMs),
            "max-items" => Ok(Parameter::MaxItems),
            "sweep-interval-ms" => Ok(Parameter::SweepIntervalMs),
            "schema-version" => Ok(Parameter::SchemaVersion),
            _ => anyhow::bail!("unknown parameter {:?}", s),
        }
    }

    pub fn serialize(&self) -> &'static str {
        match self {
            Parameter::Dir => "dir",
            Parameter::Port => "port",
            Parameter::RevealDurationMs => "reveal-duration-ms",
            Parameter::MaxItems => "max-items",
            Parameter::SweepIntervalMs => "sweep-interval-ms",
            Parameter::SchemaVersion => "schema-version",
        }
    }
}

impl Config {
    /// Parse arguments, not including the program name.
    pub fn from_args<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Config::default();
        let mut current_key = None;
        for arg in args {
            if let Some(current_key) = current_key.take() {
                config.values.insert(current_key, arg);
                continue;
            }
            match arg.strip_prefix("--") {
                Some("verbose") | Some("v") => config.verbose = true,
                Some("quiet") | Some("q") => config.quiet = true,
                Some(name) => current_key = Some(Parameter::deserialize(name)?),
                None => anyhow::bail!("invalid argument {:?}", arg),
            }
        }
        if let Some(key) = current_key {
            anyhow::bail!("missing value for --{}", key.serialize());
        }
        Ok(config)
    }

    pub fn set(&mut self, parameter: Parameter, value: impl Into<String>) {
        self.values.insert(parameter, value.into());
    }

    pub fn get(&self, parameter: Parameter) -> Option<&str> {
        self.values.get(&parameter).map(String::as_str)
    }

    /// The configured value, or the default in effect when none was given.
    pub fn effective(&self, parameter: Parameter) -> Option<String> {
        if let Some(value) = self.get(parameter) {
            return Some(value.to_string());
        }
        let defaults = StoreConfig::default();
        match parameter {
            Parameter::Dir => None,
            Parameter::Port => Some(DEFAULT_PORT.to_string()),
            Parameter::RevealDurationMs => Some(defaults.reveal_duration.as_millis().to_string()),
            Parameter::MaxItems => Some(defaults.max_items.to_string()),
            Parameter::SweepIntervalMs => Some(defaults.sweep_interval.as_millis().to_string()),
            Parameter::SchemaVersion => Some(defaults.schema_version),
        }
    }

    pub fn dir(&self) -> Option<PathBuf> {
        self.get(Parameter::Dir).map(PathBuf::from)
    }

    pub fn port(&self) -> anyhow::Result<u16> {
        match self.get(Parameter::Port) {
            Some(port) => Ok(port.parse()?),
            None => Ok(DEFAULT_PORT),
        }
    }

    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut store_config = StoreConfig::default();
        if let Some(ms) = self.positive(Parameter::RevealDurationMs)? {
            store_config.reveal_duration = Duration::from_millis(ms);
        }
        if let Some(n) = self.positive(Parameter::MaxItems)? {
            store_config.max_items = usize::try_from(n)?;
        }
        if let Some(ms) = self.positive(Parameter::SweepIntervalMs)? {
            store_config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(version) = self.get(Parameter::SchemaVersion) {
            if version.is_empty() {
                anyhow::bail!("--schema-version must not be empty");
            }
            store_config.schema_version = version.to_string();
        }
        Ok(store_config)
    }

    fn positive(&self, parameter: Parameter) -> anyhow::Result<Option<u64>> {
        let Some(raw) = self.get(parameter) else {
            return Ok(None);
        };
        let value = raw.parse::<u64>().map_err(|e| {
            anyhow::format_err!("invalid value {:?} for --{}: {}", raw, parameter.serialize(), e)
        })?;
        if value == 0 {
            anyhow::bail!("--{} must be greater than zero", parameter.serialize());
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, Parameter, StoreConfig, DEFAULT_PORT};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_parameters_and_flags() {
        let config = Config::from_args(args(&[
            "--dir",
            "/tmp/reveals",
            "--port",
            "7000",
            "--reveal-duration-ms",
            "300000",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.get(Parameter::Dir), Some("/tmp/reveals"));
        assert_eq!(config.port().unwrap(), 7000);
        assert!(config.verbose);
        assert!(!config.quiet);
        let store_config = config.store_config().unwrap();
        assert_eq!(store_config.reveal_duration, Duration::from_secs(300));
        assert_eq!(store_config.max_items, 1000);
    }

    #[test]
    fn defaults_without_arguments() {
        let config = Config::from_args(Vec::new()).unwrap();
        assert_eq!(config.port().unwrap(), DEFAULT_PORT);
        assert!(config.dir().is_none());
        assert_eq!(config.store_config().unwrap(), StoreConfig::default());
        assert_eq!(
            config.effective(Parameter::RevealDurationMs).as_deref(),
            Some("60000")
        );
        assert_eq!(config.effective(Parameter::Dir), None);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Config::from_args(args(&["positional"])).is_err());
        assert!(Config::from_args(args(&["--nonsense", "1"])).is_err());
        assert!(Config::from_args(args(&["--port"])).is_err());

        let config = Config::from_args(args(&["--max-items", "0"])).unwrap();
        assert!(config.store_config().is_err());
        let config = Config::from_args(args(&["--sweep-interval-ms", "soon"])).unwrap();
        assert!(config.store_config().is_err());
    }
}
